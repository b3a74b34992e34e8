use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EbafError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BPF error: {0}")]
    Bpf(#[from] aya::BpfError),

    #[error("BPF program error: {0}")]
    Program(#[from] aya::programs::ProgramError),

    #[error("BPF map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("classifier object not found; searched: {}", format_paths(.searched))]
    ArtifactNotFound { searched: Vec<PathBuf> },

    #[error("symbol missing from classifier object: {0}")]
    SymbolMissing(&'static str),

    #[error("failed to attach classifier to {0} in any XDP mode")]
    AttachFailed(String),

    #[error("no such network interface: {0}")]
    InterfaceNotFound(String),

    #[error("no usable network interface found")]
    NoInterface,

    #[error("blacklist not found; searched: {}", format_paths(.searched))]
    BlacklistMissing { searched: Vec<PathBuf> },

    #[error("domain registry is full")]
    RegistryFull,

    #[error("missing capability: {0}")]
    MissingCapability(String),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, EbafError>;
