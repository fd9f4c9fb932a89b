//! The commands available in the `hostfs` binary.
mod cat;
mod exists;
mod join;
mod ls;
mod size;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, anyhow};
use clap::Parser;
use hostfs_bridge::exports;
use hostfs_bridge::memory::{read_c_bytes, read_c_string};
use hostfs_bridge::resolve::guest_bytes;
use hostfs_bridge::{
    Bridge, BridgeConfig, GuestAllocator, GuestMemory, GuestPtr, LinearMemory, Reply, StatusCode,
};

pub use self::{cat::*, exists::*, join::*, ls::*, size::*};

/// Command-line arguments for the `hostfs` CLI.
#[derive(clap::Parser, Debug)]
#[clap(name = "hostfs", author, version)]
#[clap(about = "Query the host filesystem the way a sandboxed guest does")]
pub struct HostfsCmd {
    #[clap(flatten)]
    output: crate::logging::Output,
    #[clap(flatten)]
    settings: Settings,
    #[clap(subcommand)]
    cmd: Cmd,
}

impl HostfsCmd {
    fn execute(self) -> Result<StatusCode, anyhow::Error> {
        let HostfsCmd {
            output,
            settings,
            cmd,
        } = self;

        output.initialize_logging();
        let config = settings.load()?;

        match cmd {
            Cmd::Exists(exists) => exists.execute(config),
            Cmd::Size(size) => size.execute(config),
            Cmd::Cat(cat) => cat.execute(config),
            Cmd::Ls(ls) => ls.execute(config),
            Cmd::Join(join) => join.execute(config),
        }
    }

    /// The main function for the `hostfs` CLI tool.
    ///
    /// OK exits with 0 and any other status with [`STATUS_EXIT_BASE`] plus
    /// its wire value, so `ERR_PATH_NO_EXIST` is 12. That keeps statuses
    /// apart from hard errors (1) and usage errors reported by clap (2).
    pub fn run() -> ExitCode {
        match Self::parse().execute() {
            Ok(status) => ExitCode::from(exit_status(status)),
            Err(err) => {
                report(&err);
                ExitCode::FAILURE
            }
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Report whether a path exists, is a file or is a directory
    Exists(Exists),

    /// Print the size of a file in bytes
    Size(Size),

    /// Load a whole file through the guest and write it to stdout
    Cat(Cat),

    /// List every entry below a directory, recursively and sorted
    #[clap(alias = "list")]
    Ls(Ls),

    /// Join path segments with `/`
    Join(Join),
}

/// Added to the wire value of a non-OK status to form the exit code.
pub const STATUS_EXIT_BASE: u8 = 10;

/// Bridge settings shared by every subcommand.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Settings {
    /// Read bridge settings from a TOML file
    #[clap(long, global = true, env = "HOSTFS_CONFIG")]
    config: Option<PathBuf>,
    /// Resolve relative paths against this directory instead of the
    /// working directory
    #[clap(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Largest file that may be loaded, in bytes
    #[clap(long, global = true)]
    max_file_size: Option<u64>,
}

impl Settings {
    /// The config file, if any, with command-line overrides applied.
    pub fn load(&self) -> Result<BridgeConfig, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("unable to load settings from `{}`", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(base_dir) = &self.base_dir {
            config.base_dir = Some(base_dir.clone());
        }
        if let Some(max_file_size) = self.max_file_size {
            config.max_file_size = max_file_size;
        }
        Ok(config)
    }
}

/// An in-process guest that talks to the bridge only through
/// [`hostfs_bridge::exports`], then reads the results back out of its own
/// memory and frees them.
pub(crate) struct Session {
    bridge: Bridge<LinearMemory>,
}

impl Session {
    pub(crate) fn new(config: BridgeConfig) -> Self {
        let memory = LinearMemory::new(config.memory_size);
        Self {
            bridge: Bridge::new(memory, config),
        }
    }

    pub(crate) fn describe(&self, path: &Path, status: StatusCode) -> String {
        status.describe(path, self.bridge.config().max_file_size)
    }

    pub(crate) fn flags(&mut self, path: &Path) -> Result<[bool; 3], anyhow::Error> {
        let ptr = self.path(path)?;
        let flags = [
            exports::is_exist(&self.bridge, ptr)?,
            exports::is_file(&self.bridge, ptr)?,
            exports::is_directory(&self.bridge, ptr)?,
        ];
        self.free(ptr)?;
        Ok(flags.map(|flag| flag != 0))
    }

    pub(crate) fn file_size(&mut self, path: &Path) -> Result<Reply<u64>, anyhow::Error> {
        let (ptr, out) = (self.path(path)?, self.slot()?);
        let status = decode(exports::get_file_size(&mut self.bridge, ptr, out)?)?;
        let reply = self.read_u64_if_ok(status, out)?;
        self.free(ptr)?;
        self.free(out)?;
        Ok(reply)
    }

    pub(crate) fn load_file(&mut self, path: &Path) -> Result<Reply<Vec<u8>>, anyhow::Error> {
        let (ptr, out) = (self.path(path)?, self.slot()?);
        let status = decode(exports::load_file(&mut self.bridge, ptr, out)?)?;
        let reply = match status {
            StatusCode::Ok => {
                let buffer = self.read_ptr(out)?;
                let len = self
                    .bridge
                    .memory()
                    .allocation_size(buffer)
                    .ok_or_else(|| anyhow!("load_file returned an unowned buffer"))?;
                let mut bytes = vec![0u8; len as usize];
                self.bridge
                    .memory()
                    .read(buffer.offset().into(), &mut bytes)?;
                self.free(buffer)?;
                Ok(bytes)
            }
            other => Err(other),
        };
        self.free(ptr)?;
        self.free(out)?;
        Ok(reply)
    }

    pub(crate) fn entry_count(&mut self, path: &Path) -> Result<Reply<u64>, anyhow::Error> {
        let (ptr, out) = (self.path(path)?, self.slot()?);
        let status = decode(exports::get_num_dir_entries(&mut self.bridge, ptr, out)?)?;
        let reply = self.read_u64_if_ok(status, out)?;
        self.free(ptr)?;
        self.free(out)?;
        Ok(reply)
    }

    /// The raw bytes of an entry name, as the host stores it.
    pub(crate) fn entry_name(
        &mut self,
        path: &Path,
        index: u64,
    ) -> Result<Reply<Vec<u8>>, anyhow::Error> {
        let (ptr, out) = (self.path(path)?, self.slot()?);
        let status = decode(exports::get_dir_entry_name_by_index(
            &mut self.bridge,
            ptr,
            index,
            out,
        )?)?;
        let reply = match status {
            StatusCode::Ok => {
                let name = self.read_ptr(out)?;
                let value = self.read_bytes(name)?;
                self.free(name)?;
                Ok(value)
            }
            other => Err(other),
        };
        self.free(ptr)?;
        self.free(out)?;
        Ok(reply)
    }

    pub(crate) fn combined_path(&mut self, segments: &[String]) -> Result<String, anyhow::Error> {
        let ptrs = segments
            .iter()
            .map(|segment| self.string(segment.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let count = u32::try_from(ptrs.len()).context("too many path segments")?;
        let array = self
            .bridge
            .memory_mut()
            .alloc(count.saturating_mul(4))?;
        for (slot, ptr) in (0..count).zip(&ptrs) {
            array
                .add(slot * 4)?
                .write_u32(self.bridge.memory_mut(), (*ptr).into())?;
        }

        let joined = GuestPtr::new(exports::get_combined_path(&mut self.bridge, count, array)?);
        let value = self.read_string(joined)?;

        self.free(joined)?;
        self.free(array)?;
        for ptr in ptrs {
            self.free(ptr)?;
        }
        Ok(value)
    }

    fn string(&mut self, value: &[u8]) -> Result<GuestPtr, anyhow::Error> {
        Ok(self.bridge.memory_mut().store_c_string(value)?)
    }

    fn path(&mut self, path: &Path) -> Result<GuestPtr, anyhow::Error> {
        self.string(&guest_bytes(path.as_os_str()))
    }

    fn slot(&mut self) -> Result<GuestPtr, anyhow::Error> {
        Ok(self.bridge.memory_mut().alloc(8)?)
    }

    fn free(&mut self, ptr: GuestPtr) -> Result<(), anyhow::Error> {
        Ok(self.bridge.memory_mut().free(ptr)?)
    }

    fn read_ptr(&self, ptr: GuestPtr) -> Result<GuestPtr, anyhow::Error> {
        Ok(GuestPtr::new(ptr.read_u32(self.bridge.memory())?))
    }

    fn read_string(&self, ptr: GuestPtr) -> Result<String, anyhow::Error> {
        let memory = self.bridge.memory();
        let max_len = u32::try_from(memory.size()).unwrap_or(u32::MAX);
        Ok(read_c_string(memory, ptr, max_len)?)
    }

    fn read_bytes(&self, ptr: GuestPtr) -> Result<Vec<u8>, anyhow::Error> {
        let memory = self.bridge.memory();
        let max_len = u32::try_from(memory.size()).unwrap_or(u32::MAX);
        Ok(read_c_bytes(memory, ptr, max_len)?)
    }

    fn read_u64_if_ok(&self, status: StatusCode, out: GuestPtr) -> Result<Reply<u64>, anyhow::Error> {
        if !status.is_ok() {
            return Ok(Err(status));
        }
        let mut raw = [0u8; 8];
        self.bridge.memory().read(out.offset().into(), &mut raw)?;
        Ok(Ok(u64::from_le_bytes(raw)))
    }
}

fn decode(raw: u32) -> Result<StatusCode, anyhow::Error> {
    StatusCode::try_from(raw).map_err(|_| anyhow!("the bridge returned an unknown status ({raw})"))
}

fn exit_status(status: StatusCode) -> u8 {
    if status.is_ok() {
        return 0;
    }
    u8::try_from(u32::from(status))
        .ok()
        .and_then(|wire| wire.checked_add(STATUS_EXIT_BASE))
        .unwrap_or(u8::MAX)
}

fn report(err: &anyhow::Error) {
    eprintln!("error: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
