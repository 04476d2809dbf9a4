use chainfs::io::FileBlockEmulatorBuilder;
use chainfs::{self, FileSystem};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_sector_count(1024)
        .build()
        .expect("Could not initialize disk emulator.");

    // Format a new file system on the device and write a greeting into it.
    let mut fs = FileSystem::format(dev).expect("should format");
    let greeting = b"hello, sectors";
    fs.create("/home/hello.txt", greeting.len()).unwrap();
    let fd = fs.open("/home/hello.txt").unwrap();
    fs.write(fd, greeting).unwrap();

    fs.seek(fd, 0).unwrap();
    let mut buf = vec![0; greeting.len()];
    fs.read(fd, &mut buf).unwrap();
    println!("{}", String::from_utf8_lossy(&buf));
    print!("{}", fs.list_recursively("/").unwrap());
}
