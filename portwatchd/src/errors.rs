use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum LoaderError {
    #[error("loading eBPF object: {0}")]
    Load(#[from] aya::BpfError),
    #[error("program {0} not found in eBPF object")]
    MissingProgram(&'static str),
    #[error("map {0} not found in eBPF object")]
    MissingMap(&'static str),
    #[error("program error: {0}")]
    Program(#[from] aya::programs::ProgramError),
    #[error("map access failed: {0}")]
    Map(#[from] aya::maps::MapError),
}
