//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom};

/// ターゲットプロセスのメモリ読み取り
///
/// 調査専用のため書き込みは提供しません。
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// EIOエラー（未マッピング領域など）の場合はPTRACE_PEEKDATAに
    /// フォールバックします。
    pub fn read_bytes(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(5) {
                        // EIO (errno 5): ptraceにフォールバック
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。word単位で
    /// 読み取るため、小さなアクセス向きです。
    fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e)
            })?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            data.extend_from_slice(&bytes[..remaining.min(word_size)]);
        }

        data.truncate(size);
        Ok(data)
    }

    /// 実行可能ファイルのロードベースアドレスを取得する
    ///
    /// PIEの場合、実行時にランダムなアドレスにロードされるため、
    /// 最初の実行可能セグメントからファイルオフセットを引いた値を返します。
    pub fn base_address(&self) -> Result<usize> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            // フォーマット: "address perms offset dev inode pathname"
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                continue;
            }

            let addr_parts: Vec<&str> = parts[0].split('-').collect();
            if addr_parts.len() != 2 {
                continue;
            }

            let perms = parts[1];
            if perms.chars().nth(2) != Some('x') {
                continue;
            }

            let start = usize::from_str_radix(addr_parts[0], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse base address: {}", e))?;
            let offset = usize::from_str_radix(parts[2], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse segment offset: {}", e))?;

            return Ok(start - offset);
        }

        Err(anyhow::anyhow!(
            "Could not find executable segment in memory mappings"
        ))
    }
}

/// rindou_dwarfのMemoryReaderトレイトを実装
///
/// ptrace読み取りではスタックかどうかでアクセス方法は変わらないため、
/// is_stackヒントは使用しません。
impl rindou_dwarf::MemoryReader for Memory {
    fn read(&self, addr: u64, _is_stack: bool, len: usize) -> Result<Vec<u8>> {
        self.read_bytes(addr as usize, len)
    }
}
