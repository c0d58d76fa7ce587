//! Rindou ターゲットプロセス制御
//!
//! ptraceによるアタッチ、/proc経由のメモリ読み取り、レジスタ取得、
//! フレームポインタ連鎖によるスタック巻き戻しを提供します。

pub mod memory;
pub mod process;
pub mod thread;
pub mod unwind;

pub use memory::Memory;
pub use process::Process;
pub use thread::ThreadSnapshot;

/// ターゲット操作の結果型
pub type Result<T> = anyhow::Result<T>;
