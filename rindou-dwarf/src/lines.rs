//! ソース行の検索

use crate::Result;
use std::path::Path;

/// ソース位置
#[derive(Debug, Clone, PartialEq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
}

/// アドレスからソース位置を引く
pub struct LineLookup {
    loader: addr2line::Loader,
}

impl LineLookup {
    /// 実行ファイルから行情報を読み込む
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = addr2line::Loader::new(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load line info: {}", e))?;
        Ok(Self { loader })
    }

    /// アドレスに対応するソース位置を取得する
    ///
    /// アドレスはデバッグ情報の座標（ロードバイアス適用前）で渡します。
    pub fn lookup(&self, addr: u64) -> Option<LineInfo> {
        let location = self.loader.find_location(addr).ok()??;
        Some(LineInfo {
            file: location.file?.to_string(),
            line: location.line?,
        })
    }
}
