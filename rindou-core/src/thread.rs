//! スレッドとフレームのナビゲーション
//!
//! アタッチ時に採取したスナップショットの上を移動するための型です。
//! フレームはスナップショットを共有参照するだけの軽いハンドルです。

use crate::errors::AccessError;
use crate::inspector::Inspector;
use crate::scope::VarScope;
use crate::Result;
use nix::sys::signal::Signal;
use rindou_dwarf::FrameContext;
use rindou_target::ThreadSnapshot;
use std::fmt;
use std::rc::Rc;

/// 1スレッドあたりの最大フレーム数
pub const MAX_FRAMES: usize = 64;

/// スレッド一覧
pub struct Threads {
    list: Vec<Rc<ThreadSnapshot>>,
    cursor: usize,
}

impl Threads {
    /// スナップショット列から一覧を作る
    pub fn new(snapshots: Vec<ThreadSnapshot>) -> Self {
        Self {
            list: snapshots.into_iter().map(Rc::new).collect(),
            cursor: 0,
        }
    }

    /// スレッド数を取得する
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// 番号でスレッドを取得する
    pub fn get(&self, index: usize) -> Result<Thread> {
        let Some(data) = self.list.get(index) else {
            return Err(AccessError::ThreadIndex {
                index,
                last: self.list.len().saturating_sub(1),
            }
            .into());
        };
        Ok(Thread {
            data: Rc::clone(data),
        })
    }

    /// 次のスレッドを取り出す
    ///
    /// 末尾まで達したらNoneを返し、次の呼び出しに備えて先頭へ巻き戻します。
    pub fn next(&mut self) -> Option<Thread> {
        match self.list.get(self.cursor) {
            Some(data) => {
                self.cursor += 1;
                Some(Thread {
                    data: Rc::clone(data),
                })
            }
            None => {
                self.cursor = 0;
                None
            }
        }
    }
}

/// スレッド
#[derive(Debug)]
pub struct Thread {
    data: Rc<ThreadSnapshot>,
}

impl Thread {
    /// スレッドIDを取得する
    pub fn tid(&self) -> i32 {
        self.data.tid
    }

    /// /proc由来の状態文字を取得する
    pub fn state(&self) -> char {
        self.data.state
    }

    /// フレーム数を取得する
    pub fn frame_count(&self) -> usize {
        self.data.frame_count()
    }

    /// フレームの列挙子を作る
    pub fn frames(&self) -> Frames {
        Frames {
            data: Rc::clone(&self.data),
            cursor: 0,
        }
    }

    /// 番号でフレームを取得する
    pub fn frame(&self, index: usize) -> Result<Frame> {
        Frame::new(Rc::clone(&self.data), index)
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thread:tid={}:state={}:frames={}",
            self.data.tid,
            self.data.state,
            self.data.frame_count()
        )
    }
}

/// フレームの列挙子
///
/// `Threads`と同じ巻き戻し方式です。
pub struct Frames {
    data: Rc<ThreadSnapshot>,
    cursor: usize,
}

impl Frames {
    pub fn len(&self) -> usize {
        self.data.frame_count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.frame_count() == 0
    }

    /// 番号でフレームを取得する
    pub fn get(&self, index: usize) -> Result<Frame> {
        Frame::new(Rc::clone(&self.data), index)
    }

    /// 次のフレームを取り出す
    pub fn next(&mut self) -> Option<Frame> {
        if self.cursor >= self.data.frame_count() {
            self.cursor = 0;
            return None;
        }
        let frame = Frame {
            data: Rc::clone(&self.data),
            index: self.cursor,
        };
        self.cursor += 1;
        Some(frame)
    }
}

/// 呼び出しフレーム
///
/// 番号0が最内（現在実行中）のフレームです。
#[derive(Debug)]
pub struct Frame {
    data: Rc<ThreadSnapshot>,
    index: usize,
}

impl Frame {
    fn new(data: Rc<ThreadSnapshot>, index: usize) -> Result<Self> {
        let count = data.frame_count();
        if index >= count {
            return Err(AccessError::FrameIndex {
                index,
                last: count.saturating_sub(1),
            }
            .into());
        }
        Ok(Self { data, index })
    }

    /// フレーム番号を取得する
    pub fn index(&self) -> usize {
        self.index
    }

    /// 所属スレッドのIDを取得する
    pub fn tid(&self) -> i32 {
        self.data.tid
    }

    /// レジスタコンテキストを取得する
    pub fn ctx(&self) -> &FrameContext {
        &self.data.frames[self.index]
    }

    /// プログラムカウンタを取得する
    pub fn pc(&self) -> u64 {
        self.data.pcs[self.index]
    }

    /// 呼び出し元のフレームへ移動する
    ///
    /// 最外フレームではNoneです。
    pub fn up(&self) -> Option<Frame> {
        Frame::new(Rc::clone(&self.data), self.index + 1).ok()
    }

    /// 呼び出し先のフレームへ移動する
    ///
    /// 最内フレームではNoneです。
    pub fn down(&self) -> Option<Frame> {
        let index = self.index.checked_sub(1)?;
        Frame::new(Rc::clone(&self.data), index).ok()
    }

    /// シグナルで停止したフレームかどうか
    ///
    /// 最内フレームにのみシグナル情報が付きます。
    pub fn is_signal(&self) -> bool {
        self.index == 0 && self.data.signo.is_some()
    }

    /// シグナル番号を取得する
    pub fn signo(&self) -> Option<i32> {
        if self.index == 0 {
            self.data.signo
        } else {
            None
        }
    }

    /// シグナル名("SIGSEGV"等)を取得する
    pub fn signame(&self) -> Option<&'static str> {
        let signo = self.signo()?;
        Signal::try_from(signo).ok().map(|s| s.as_str())
    }

    /// PCに対応するシンボル表記を取得する
    pub fn label(&self, insp: &Inspector) -> Option<String> {
        insp.symbol_at(self.pc())
    }

    /// PCに対応するソース位置を取得する
    pub fn source(&self, insp: &Inspector) -> Option<(String, u32)> {
        insp.source_at(self.pc())
    }

    /// このフレームの変数スコープを作る
    pub fn scope(&self, insp: &Inspector) -> VarScope {
        VarScope::new(insp, self.ctx().clone())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame #{} of thread {}", self.index, self.data.tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tid: i32, pcs: &[u64], signo: Option<i32>) -> ThreadSnapshot {
        ThreadSnapshot {
            tid,
            state: 't',
            frames: pcs
                .iter()
                .map(|pc| FrameContext::from_unwind(*pc, 0, 0))
                .collect(),
            pcs: pcs.to_vec(),
            signo,
        }
    }

    #[test]
    fn test_threads_iteration_resets_after_exhaustion() {
        let mut threads = Threads::new(vec![
            snapshot(100, &[0x1000], None),
            snapshot(101, &[0x2000], None),
        ]);

        assert_eq!(threads.next().map(|t| t.tid()), Some(100));
        assert_eq!(threads.next().map(|t| t.tid()), Some(101));
        assert!(threads.next().is_none());
        // 巻き戻されて再列挙できる
        assert_eq!(threads.next().map(|t| t.tid()), Some(100));
    }

    #[test]
    fn test_thread_index_out_of_range() {
        let threads = Threads::new(vec![snapshot(100, &[0x1000], None)]);
        let err = threads.get(9).unwrap_err();
        assert_eq!(err.to_string(), "invalid thread index 9 (range is 0-0)");
    }

    #[test]
    fn test_frame_index_out_of_range() {
        let threads = Threads::new(vec![snapshot(100, &[0x1000, 0x2000, 0x3000], None)]);
        let thread = threads.get(0).unwrap();
        let err = thread.frame(5).unwrap_err();
        assert_eq!(err.to_string(), "frame 5 is outside range 0-2");
    }

    #[test]
    fn test_frame_navigation() {
        let threads = Threads::new(vec![snapshot(100, &[0x1000, 0x2000, 0x3000], None)]);
        let thread = threads.get(0).unwrap();

        let innermost = thread.frame(0).unwrap();
        assert!(innermost.down().is_none());
        let caller = innermost.up().unwrap();
        assert_eq!(caller.pc(), 0x2000);
        let outermost = caller.up().unwrap();
        assert_eq!(outermost.index(), 2);
        assert!(outermost.up().is_none());
        assert_eq!(outermost.down().map(|f| f.index()), Some(1));
    }

    #[test]
    fn test_frames_iteration_order() {
        let threads = Threads::new(vec![snapshot(100, &[0x1000, 0x2000], None)]);
        let thread = threads.get(0).unwrap();
        let mut frames = thread.frames();

        assert_eq!(frames.next().map(|f| f.pc()), Some(0x1000));
        assert_eq!(frames.next().map(|f| f.pc()), Some(0x2000));
        assert!(frames.next().is_none());
        assert_eq!(frames.next().map(|f| f.pc()), Some(0x1000));
    }

    #[test]
    fn test_signal_frame() {
        let threads = Threads::new(vec![snapshot(100, &[0x1000, 0x2000], Some(11))]);
        let thread = threads.get(0).unwrap();

        let innermost = thread.frame(0).unwrap();
        assert!(innermost.is_signal());
        assert_eq!(innermost.signo(), Some(11));
        assert_eq!(innermost.signame(), Some("SIGSEGV"));

        // シグナル情報が付くのは最内フレームだけ
        let caller = thread.frame(1).unwrap();
        assert!(!caller.is_signal());
        assert_eq!(caller.signame(), None);
    }

    #[test]
    fn test_display_format() {
        let threads = Threads::new(vec![snapshot(42, &[0x1000], None)]);
        let thread = threads.get(0).unwrap();
        assert_eq!(thread.to_string(), "thread:tid=42:state=t:frames=1");
        assert_eq!(
            thread.frame(0).unwrap().to_string(),
            "frame #0 of thread 42"
        );
    }
}
