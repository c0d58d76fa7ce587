//! プロセス制御機能
//!
//! 既存プロセスへのアタッチと、全スレッドのレジスタ・停止シグナルの取得を
//! 提供します。アタッチ中はターゲットの全スレッドが停止します。

use crate::memory::Memory;
use crate::thread::ThreadSnapshot;
use crate::Result;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use rindou_dwarf::FrameContext;
use std::fs;
use tracing::{debug, warn};

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
    tids: Vec<Pid>,
}

impl Process {
    /// 既存のプロセスの全スレッドにアタッチする
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        let tids = list_tasks(pid)?;
        if tids.is_empty() {
            return Err(anyhow::anyhow!("process {} has no tasks", pid));
        }

        for tid in &tids {
            ptrace::attach(*tid)
                .map_err(|e| anyhow::anyhow!("unable to attach to pid {}: {}", tid, e))?;
            // 非リーダースレッドの停止待ちには__WALLが必要
            waitpid(*tid, Some(WaitPidFlag::__WALL))?;
        }
        debug!("attached to {} task(s) of pid {}", tids.len(), pid);

        Ok(Self { pid, tids })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// スレッドID一覧を取得する
    pub fn threads(&self) -> &[Pid] {
        &self.tids
    }

    /// スレッドの実行状態を取得する
    ///
    /// /proc/pid/task/tid/statの状態文字(R/S/t等)を返します。読めない
    /// 場合は'?'です。
    pub fn thread_state(&self, tid: Pid) -> char {
        let path = format!("/proc/{}/task/{}/stat", self.pid, tid);
        let Ok(stat) = fs::read_to_string(&path) else {
            return '?';
        };
        // コマンド名に空白が含まれ得るので、最後の')'より後ろを見る
        let Some(rest) = stat.rsplit_once(')').map(|(_, rest)| rest) else {
            return '?';
        };
        rest.split_whitespace()
            .next()
            .and_then(|s| s.chars().next())
            .unwrap_or('?')
    }

    /// スレッドのレジスタを取得する
    pub fn thread_context(&self, tid: Pid) -> Result<FrameContext> {
        let regs = ptrace::getregs(tid)
            .map_err(|e| anyhow::anyhow!("failed to read registers of {}: {}", tid, e))?;
        Ok(context_from_regs(&regs))
    }

    /// スレッドを停止させたシグナル番号を取得する
    ///
    /// アタッチによるSIGSTOPとデバッグ用のSIGTRAPは対象外です。
    pub fn stop_signal(&self, tid: Pid) -> Option<i32> {
        let siginfo = ptrace::getsiginfo(tid).ok()?;
        let signo = siginfo.si_signo;
        if signo == 0 || signo == nix::libc::SIGSTOP || signo == nix::libc::SIGTRAP {
            return None;
        }
        Some(signo)
    }

    /// 全スレッドのスナップショットを取得する
    ///
    /// レジスタが読めないスレッドは警告を出してスキップします。
    pub fn snapshot_threads(&self, mem: &Memory, max_depth: usize) -> Result<Vec<ThreadSnapshot>> {
        let mut snapshots = Vec::with_capacity(self.tids.len());

        for tid in &self.tids {
            let ctx = match self.thread_context(*tid) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!("skipping thread {}: {}", tid, e);
                    continue;
                }
            };
            let state = self.thread_state(*tid);
            let signo = self.stop_signal(*tid);
            snapshots.push(ThreadSnapshot::capture(
                tid.as_raw(),
                state,
                ctx,
                signo,
                mem,
                max_depth,
            ));
        }

        Ok(snapshots)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        for tid in &self.tids {
            let _ = ptrace::detach(*tid, None);
        }
    }
}

/// /proc/pid/taskからスレッドID一覧を読む
fn list_tasks(pid: Pid) -> Result<Vec<Pid>> {
    let task_dir = format!("/proc/{}/task", pid);
    let entries = fs::read_dir(&task_dir)
        .map_err(|e| anyhow::anyhow!("unable to attach to pid {}: {}", pid, e))?;

    let mut tids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            tids.push(Pid::from_raw(tid));
        }
    }
    tids.sort();
    Ok(tids)
}

/// ptraceのレジスタ構造体をDWARF番号付けのコンテキストに変換する
#[cfg(target_arch = "x86_64")]
fn context_from_regs(regs: &nix::libc::user_regs_struct) -> FrameContext {
    let mut ctx = FrameContext::default();
    ctx.pc = regs.rip;
    ctx.regs = [
        regs.rax, regs.rdx, regs.rcx, regs.rbx, regs.rsi, regs.rdi, regs.rbp, regs.rsp, regs.r8,
        regs.r9, regs.r10, regs.r11, regs.r12, regs.r13, regs.r14, regs.r15, regs.rip,
    ];
    ctx
}
