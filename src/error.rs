use thiserror::Error;

/// 库内统一错误类型。
///
/// `Configuration` 与 `DistanceExceedsBuild` 在任何构建/搜索开始前即返回；
/// `InvalidLength` / `InvalidBase` 只影响单条 guide，不会中断整个批次。
#[derive(Debug, Error)]
pub enum OffTargetError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("guide length {actual} does not match motif guide length {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid base '{base}' at guide position {pos}")]
    InvalidBase { base: char, pos: usize },

    #[error("requested distance {requested} exceeds the database build distance {built}")]
    DistanceExceedsBuild { requested: u32, built: u32 },

    #[error("search cancelled")]
    Cancelled,

    #[error("corrupt database: {0}")]
    CorruptDatabase(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, OffTargetError>;

impl OffTargetError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
