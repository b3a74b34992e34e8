mod maps;

pub use maps::{AllowSet, BlockSet, StatsCounters};

use std::path::PathBuf;

use aya::maps::{HashMap as BpfHashMap, PerCpuArray};
use aya::programs::xdp::{Xdp, XdpFlags, XdpLinkId};
use aya::programs::ProgramError;
use aya::Bpf;
use tracing::{debug, info, warn};

use crate::error::{EbafError, Result};

/// File name of the compiled classifier object.
const ARTIFACT: &str = "ebaf-ebpf.o";
/// Classifier function symbol inside the object.
const PROGRAM: &str = "xdp_blocker";

/// Owns the loaded classifier and its attachment to an interface.
///
/// Dropping a `Firewall` detaches first; `detach` is idempotent and safe to
/// call on the shutdown path even after a partial startup.
pub struct Firewall {
    bpf: Bpf,
    link: Option<XdpLinkId>,
    iface: Option<String>,
}

impl Firewall {
    /// Locate the classifier object, load it, and load the XDP program
    /// into the kernel. Does not attach.
    pub fn load() -> Result<Self> {
        let path = locate_artifact()?;
        info!(path = %path.display(), "loading classifier");

        let mut bpf = Bpf::load_file(&path)?;
        let program: &mut Xdp = bpf
            .program_mut(PROGRAM)
            .ok_or(EbafError::SymbolMissing(PROGRAM))?
            .try_into()?;
        program.load()?;

        Ok(Self {
            bpf,
            link: None,
            iface: None,
        })
    }

    /// Attach to `iface`, trying driver-native mode, then generic (SKB)
    /// mode, then the kernel default. First success wins.
    pub fn attach(&mut self, iface: &str) -> Result<()> {
        let program: &mut Xdp = self
            .bpf
            .program_mut(PROGRAM)
            .ok_or(EbafError::SymbolMissing(PROGRAM))?
            .try_into()?;

        let ladder = [
            (XdpFlags::DRV_MODE, "driver-native"),
            (XdpFlags::SKB_MODE, "generic"),
            (XdpFlags::default(), "default"),
        ];
        for (flags, mode) in ladder {
            match program.attach(iface, flags) {
                Ok(link) => {
                    info!(iface, mode, "classifier attached");
                    self.link = Some(link);
                    self.iface = Some(iface.to_string());
                    return Ok(());
                }
                Err(e) if is_not_supported(&e) => {
                    debug!(iface, mode, "attach mode not supported");
                }
                Err(e) => {
                    warn!(iface, mode, error = %e, "attach failed");
                }
            }
        }
        Err(EbafError::AttachFailed(iface.to_string()))
    }

    /// Detach from the interface. Idempotent; errors are logged, not
    /// propagated, so teardown always completes.
    pub fn detach(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let iface = self.iface.take().unwrap_or_default();
        let program: std::result::Result<&mut Xdp, _> = self
            .bpf
            .program_mut(PROGRAM)
            .ok_or(EbafError::SymbolMissing(PROGRAM))
            .and_then(|p| p.try_into().map_err(EbafError::Program));
        match program {
            Ok(program) => match program.detach(link) {
                Ok(()) => info!(iface = %iface, "classifier detached"),
                Err(e) => warn!(iface = %iface, error = %e, "detach failed"),
            },
            Err(e) => warn!(iface = %iface, error = %e, "detach failed"),
        }
    }

    pub fn take_block_set(&mut self) -> Result<BlockSet> {
        let map = self
            .bpf
            .take_map("block_set")
            .ok_or(EbafError::SymbolMissing("block_set"))?;
        Ok(BlockSet::new(BpfHashMap::try_from(map)?))
    }

    pub fn take_allow_set(&mut self) -> Result<AllowSet> {
        let map = self
            .bpf
            .take_map("allow_set")
            .ok_or(EbafError::SymbolMissing("allow_set"))?;
        Ok(AllowSet::new(BpfHashMap::try_from(map)?))
    }

    pub fn take_stats(&mut self) -> Result<StatsCounters> {
        let map = self
            .bpf
            .take_map("stats")
            .ok_or(EbafError::SymbolMissing("stats"))?;
        Ok(StatsCounters::new(PerCpuArray::try_from(map)?))
    }
}

impl Drop for Firewall {
    fn drop(&mut self) {
        self.detach();
    }
}

fn is_not_supported(err: &ProgramError) -> bool {
    match err {
        ProgramError::SyscallError(e) => std::error::Error::source(e)
            .and_then(|src| src.downcast_ref::<std::io::Error>())
            .and_then(std::io::Error::raw_os_error)
            == Some(libc::EOPNOTSUPP),
        _ => false,
    }
}

/// Raise the locked-memory limit so map creation is not rejected.
/// Refusal is non-fatal: kernels with BPF memory accounting do not consult
/// RLIMIT_MEMLOCK for map allocations.
pub fn raise_memlock_limit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("failed to raise RLIMIT_MEMLOCK; map creation may fail on older kernels");
    }
}

/// Verify the process can load and attach kernel programs: either root or
/// CAP_BPF + CAP_NET_ADMIN.
pub fn check_capabilities() -> Result<()> {
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        debug!("running as root, capabilities available");
        return Ok(());
    }

    for cap in [caps::Capability::CAP_BPF, caps::Capability::CAP_NET_ADMIN] {
        match caps::has_cap(None, caps::CapSet::Effective, cap) {
            Ok(true) => debug!(%cap, "capability available"),
            Ok(false) => return Err(EbafError::MissingCapability(cap.to_string())),
            Err(e) => {
                return Err(EbafError::MissingCapability(format!("{cap} (check failed: {e})")))
            }
        }
    }
    Ok(())
}

/// Search path for the classifier object, in order. First hit wins.
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("."),
        PathBuf::from("bin"),
        PathBuf::from("obj"),
    ];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.to_path_buf());
            dirs.push(dir.join("../obj"));
        }
    }
    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/usr/local/share/ebaf"));
    dirs
}

fn locate_artifact() -> Result<PathBuf> {
    let searched: Vec<PathBuf> = search_dirs().iter().map(|d| d.join(ARTIFACT)).collect();
    match searched.iter().find(|p| p.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(EbafError::ArtifactNotFound { searched }),
    }
}
