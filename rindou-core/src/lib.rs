//! Rindou コアエンジン
//!
//! デバッグ情報と停止中プロセスのメモリを橋渡しする層です。
//! 変数参照(`VarRef`)と値(`Value`)、スコープ(`VarScope`)、
//! スレッド/フレームのナビゲーション、セッション管理(`Debugger`)を
//! 提供します。

pub mod command;
pub mod debugger;
pub mod errors;
pub mod inspector;
pub mod scope;
pub mod thread;
pub mod value;
pub mod var;

pub use command::Command;
pub use debugger::Debugger;
pub use errors::AccessError;
pub use inspector::Inspector;
pub use scope::VarScope;
pub use thread::{Frame, Frames, Thread, Threads, MAX_FRAMES};
pub use value::{Resolution, ScalarValue, Value};
pub use var::VarRef;

/// コア操作の結果型
pub type Result<T> = anyhow::Result<T>;
