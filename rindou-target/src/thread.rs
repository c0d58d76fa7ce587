//! スレッドのスナップショット

use crate::unwind;
use rindou_dwarf::{FrameContext, MemoryReader};

/// 停止中スレッドの状態
///
/// アタッチ時点のレジスタとスタック巻き戻しの結果を保持します。
/// フィールドは調査用に公開しています。
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    /// スレッドID
    pub tid: i32,
    /// /proc由来の状態文字
    pub state: char,
    /// フレーム列（先頭が最内）
    pub frames: Vec<FrameContext>,
    /// 各フレームのPC
    pub pcs: Vec<u64>,
    /// スレッドを停止させたシグナル番号
    pub signo: Option<i32>,
}

impl ThreadSnapshot {
    /// レジスタからスタックを巻き戻してスナップショットを作る
    pub fn capture(
        tid: i32,
        state: char,
        ctx: FrameContext,
        signo: Option<i32>,
        mem: &dyn MemoryReader,
        max_depth: usize,
    ) -> Self {
        let frames = unwind::walk_stack(mem, ctx, max_depth);
        let pcs = frames.iter().map(|f| f.pc).collect();
        Self {
            tid,
            state,
            frames,
            pcs,
            signo,
        }
    }

    /// フレーム数を取得する
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}
