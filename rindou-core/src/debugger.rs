//! デバッグセッション
//!
//! アタッチ・デバッグ情報の読み込み・スナップショット採取をまとめた
//! ファサードです。フロントエンドはこれだけを持てば操作できます。

use crate::errors::{ERR_NO_DEBUG_INFO, ERR_NOT_ATTACHED};
use crate::inspector::Inspector;
use crate::thread::{Threads, MAX_FRAMES};
use crate::Result;
use anyhow::anyhow;
use rindou_dwarf::{build_tree, DwarfLoader, LineLookup, MemoryReader, SymbolResolver};
use rindou_target::{Memory, Process};
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

/// デバッグセッション
#[derive(Default)]
pub struct Debugger {
    process: Option<Process>,
    memory: Option<Rc<Memory>>,
    inspector: Option<Inspector>,
    threads: Option<Threads>,
}

impl Debugger {
    /// 空のセッションを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// プロセスにアタッチする
    ///
    /// ターゲットの全スレッドが停止します。セッション破棄時にデタッチ
    /// されます。
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let process = Process::attach(pid)?;
        info!("attached to pid {}", process.pid());
        self.memory = Some(Rc::new(Memory::new(process.pid())));
        self.process = Some(process);
        Ok(())
    }

    /// 実行ファイルのデバッグ情報を読み込む
    ///
    /// PIEの場合は/proc/pid/mapsからロードベースを求めて調査コンテキストに
    /// 設定します。行情報は読めなくても続行します。
    pub fn load_binary<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let memory = self
            .memory
            .clone()
            .ok_or_else(|| anyhow!(ERR_NOT_ATTACHED))?;

        let loader = DwarfLoader::load(&path)?;
        let tree = build_tree(&loader)?;
        let symbols = SymbolResolver::new(&loader)?;
        let is_pie = loader.is_pie();

        let mut inspector = Inspector::new(tree, memory.clone() as Rc<dyn MemoryReader>);
        if is_pie {
            match memory.base_address() {
                Ok(base) => inspector.set_load_bias(base as u64),
                Err(e) => warn!("failed to determine load base: {}", e),
            }
        }
        inspector.set_symbols(symbols);
        match LineLookup::new(&path) {
            Ok(lines) => inspector.set_lines(lines),
            Err(e) => warn!("line info unavailable: {}", e),
        }

        self.inspector = Some(inspector);
        Ok(())
    }

    /// 全スレッドのスナップショットを採取する
    pub fn snapshot_threads(&mut self) -> Result<()> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| anyhow!(ERR_NOT_ATTACHED))?;
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| anyhow!(ERR_NOT_ATTACHED))?;

        let snapshots = process.snapshot_threads(memory, MAX_FRAMES)?;
        info!("captured {} thread(s)", snapshots.len());
        self.threads = Some(Threads::new(snapshots));
        Ok(())
    }

    /// スレッド一覧を取得する
    pub fn threads(&mut self) -> Result<&mut Threads> {
        self.threads
            .as_mut()
            .ok_or_else(|| anyhow!(ERR_NOT_ATTACHED))
    }

    /// 調査コンテキストを取得する
    pub fn inspector(&self) -> Result<&Inspector> {
        self.inspector
            .as_ref()
            .ok_or_else(|| anyhow!(ERR_NO_DEBUG_INFO))
    }
}
