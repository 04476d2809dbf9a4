mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chainfs::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
use chainfs::{FileSystem, FsError, Result, SECTOR_SIZE};
use clap::Parser;
use cli::{Cli, Command};
use log::info;

fn create_image(path: &Path, sectors: usize) -> io::Result<FileBlockEmulator> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    FileBlockEmulatorBuilder::from(fd)
        .with_sector_count(sectors)
        .build()
}

fn open_image(path: &Path) -> io::Result<FileBlockEmulator> {
    let fd = OpenOptions::new().read(true).write(true).open(path)?;
    let sectors = fd.metadata()?.len() as usize / SECTOR_SIZE;
    FileBlockEmulatorBuilder::from(fd)
        .with_sector_count(sectors)
        .clear_medium(false)
        .build()
}

fn run(fs: &mut FileSystem<FileBlockEmulator>, command: Command) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match command {
        Command::Format { .. } => {
            return Err(FsError::InvalidArgument(
                "format does not run on a mounted image".to_string(),
            ))
        }
        Command::Put { source, path } => {
            let data = fs::read(&source)?;
            fs.create(&path, data.len())?;
            let fd = fs.open(&path)?;
            fs.write(fd, &data)?;
            fs.close(fd)?;
            info!("copied {:?} to {} ({} bytes)", source, path, data.len());
        }
        Command::Cat { path } => {
            let fd = fs.open(&path)?;
            let mut data = vec![0; fs.file_length(fd)?];
            fs.read(fd, &mut data)?;
            fs.close(fd)?;
            stdout.write_all(&data)?;
        }
        Command::Rm { path } => fs.remove(&path)?,
        Command::Mkdir { path } => fs.mkdir(&path)?,
        Command::Ls { path, recursive } => {
            if recursive {
                write!(stdout, "{}", fs.list_recursively(&path)?)?;
            } else {
                for name in fs.list(&path)? {
                    writeln!(stdout, "{}", name)?;
                }
            }
        }
        Command::Dump => writeln!(stdout, "{}", fs.dump()?)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Format { sectors } => {
            let fs = FileSystem::format(create_image(&cli.image, sectors)?)?;
            fs.unmount()?;
            info!("formatted {:?} with {} sectors", cli.image, sectors);
        }
        command => {
            let mut fs = FileSystem::mount(open_image(&cli.image)?)?;
            run(&mut fs, command)?;
            fs.unmount()?;
        }
    }
    Ok(())
}
