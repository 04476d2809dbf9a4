use chainfs::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use chainfs::{FileSystem, FsError, LINKED_DIRECT, SECTOR_SIZE};
use tempfile::NamedTempFile;

const DISK_SECTORS: usize = 1024;

fn fresh_disk(tf: &NamedTempFile) -> FileBlockEmulator {
  FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
    .with_sector_count(DISK_SECTORS)
    .build()
    .unwrap()
}

fn existing_disk(tf: &NamedTempFile) -> FileBlockEmulator {
  FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
    .with_sector_count(DISK_SECTORS)
    // Don't reset initialized disk.
    .clear_medium(false)
    .build()
    .unwrap()
}

#[test]
fn can_initialize_disk_with_filesystem() {
  let tf = NamedTempFile::new().unwrap();

  // Prepare the disk with filesystem layout.
  let fs = FileSystem::format(fresh_disk(&tf)).unwrap();
  fs.unmount().unwrap();

  // Open filesystem and verify init layout.
  let mut fs = FileSystem::mount(existing_disk(&tf)).unwrap();
  assert!(fs.list("/").unwrap().is_empty());
}

#[test]
fn unformatted_disk_does_not_mount() {
  let tf = NamedTempFile::new().unwrap();

  match FileSystem::mount(fresh_disk(&tf)) {
    Err(FsError::InvalidLayout(_)) => (),
    Err(e) => panic!("Unexpected error type: {}", e),
    Ok(_) => panic!("mounted a blank disk"),
  }
}

#[test]
fn disk_of_another_size_does_not_mount() {
  let tf = NamedTempFile::new().unwrap();
  FileSystem::format(fresh_disk(&tf)).unwrap();

  let dev = FileBlockEmulator::open_disk(tf.path(), DISK_SECTORS * 2).unwrap();
  assert!(matches!(FileSystem::mount(dev), Err(FsError::InvalidLayout(_))));
}

#[test]
fn files_survive_remount() {
  let tf = NamedTempFile::new().unwrap();
  let contents: Vec<u8> = (0..50 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();

  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();
  fs.create("/docs/notes", contents.len()).unwrap();
  let fd = fs.open("/docs/notes").unwrap();
  assert_eq!(fs.write(fd, &contents).unwrap(), contents.len());
  fs.close(fd).unwrap();
  let free = fs.num_free_sectors().unwrap();
  fs.unmount().unwrap();

  let mut fs = FileSystem::mount(existing_disk(&tf)).unwrap();
  assert_eq!(fs.num_free_sectors().unwrap(), free);
  assert_eq!(fs.list_recursively("/").unwrap(), "[D] docs\n    [F] notes\n");

  let fd = fs.open("/docs/notes").unwrap();
  assert_eq!(fs.file_length(fd).unwrap(), contents.len());
  let mut read = vec![0; contents.len() + 10];
  assert_eq!(fs.read(fd, &mut read).unwrap(), contents.len());
  assert_eq!(&read[..contents.len()], &contents[..]);
}

#[test]
fn path_creation_builds_intermediate_directories() {
  let tf = NamedTempFile::new().unwrap();
  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();

  fs.create("/x/y/z", 100).unwrap();

  assert_eq!(fs.list("/").unwrap(), vec!["x"]);
  assert_eq!(fs.list("/x").unwrap(), vec!["y"]);
  assert_eq!(fs.list("/x/y").unwrap(), vec!["z"]);
  assert!(fs.open("/x/y/z").is_ok());
  assert!(matches!(fs.open("/x/y/w"), Err(FsError::NotFound)));
}

#[test]
fn failed_create_leaves_no_trace() {
  let tf = NamedTempFile::new().unwrap();
  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();

  fs.create("/a", 10 * SECTOR_SIZE).unwrap();
  let free = fs.num_free_sectors().unwrap();

  assert!(matches!(fs.create("/a", 10 * SECTOR_SIZE), Err(FsError::AlreadyExists)));
  assert_eq!(fs.num_free_sectors().unwrap(), free);
}

#[test]
fn remove_reclaims_all_space() {
  let tf = NamedTempFile::new().unwrap();
  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();
  fs.mkdir("/sub").unwrap();

  for path in &["/file", "/sub/file"] {
    for &size in &[0, SECTOR_SIZE, (LINKED_DIRECT + 5) * SECTOR_SIZE] {
      let free = fs.num_free_sectors().unwrap();
      fs.create(path, size).unwrap();
      fs.remove(path).unwrap();
      assert_eq!(fs.num_free_sectors().unwrap(), free, "{} of {} bytes", path, size);
    }
  }
}

#[test]
fn data_crosses_index_block_boundary() {
  let tf = NamedTempFile::new().unwrap();
  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();
  let size = (LINKED_DIRECT + 1) * SECTOR_SIZE;
  fs.create("/edge", size).unwrap();

  let fd = fs.open("/edge").unwrap();
  // Straddle the last sector of the first index block and the first sector of
  // the second one.
  fs.seek(fd, LINKED_DIRECT * SECTOR_SIZE - 3).unwrap();
  assert_eq!(fs.write(fd, b"abcdef").unwrap(), 6);

  fs.seek(fd, LINKED_DIRECT * SECTOR_SIZE - 4).unwrap();
  let mut read = [0xff; 8];
  assert_eq!(fs.read(fd, &mut read).unwrap(), 8);
  assert_eq!(&read, b"\0abcdef\0");
}

#[test]
fn disk_fills_up_and_recovers() {
  let tf = NamedTempFile::new().unwrap();
  let mut fs = FileSystem::format(fresh_disk(&tf)).unwrap();

  let mut created = Vec::new();
  for i in 0.. {
    let path = format!("/blob{}", i);
    match fs.create(&path, 100 * SECTOR_SIZE) {
      Ok(()) => created.push(path),
      Err(FsError::NoSpace) => break,
      Err(e) => panic!("Unexpected error type: {}", e),
    }
  }
  assert_eq!(created.len(), 9);

  let free = fs.num_free_sectors().unwrap();
  fs.remove(&created[0]).unwrap();
  fs.create("/again", 100 * SECTOR_SIZE).unwrap();
  assert_eq!(fs.num_free_sectors().unwrap(), free);
}
