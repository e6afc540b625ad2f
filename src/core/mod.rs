//! 核心层：错误分类与恢复

pub mod error;
pub mod recovery;

pub use error::{ProcureError, RecoveryAction};
pub use recovery::RecoveryEngine;
