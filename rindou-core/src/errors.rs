//! エラー定義

use thiserror::Error;

/// 値・フレームへのアクセスで利用者の操作が不正な場合のエラー
///
/// デバッグ情報の欠損・破損は対象外で、そちらはログを出して値なし扱いに
/// なります。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    /// 構造体・共用体に指定名のメンバがない
    #[error("no such element {0}")]
    NoSuchElement(String),

    /// 集約型以外へのメンバアクセス
    #[error("attempt to index a non-structured type")]
    NotAggregate,

    /// 配列アクセスは未実装
    #[error("array access is not implemented")]
    ArrayAccess,

    /// ポインタ以外のデリファレンス
    #[error("Attempt to dereference a non-pointer")]
    DerefNonPointer,

    /// voidポインタのデリファレンス
    #[error("Attempt to dereference a void pointer")]
    DerefVoidPointer,

    /// スカラとして扱えないバイトサイズ
    #[error("invalid byte size {0}")]
    InvalidByteSize(u64),

    /// 型が解決できない値の読み取り
    #[error("type of value could not be resolved")]
    Unresolved,

    /// フレーム番号が範囲外
    #[error("frame {index} is outside range 0-{last}")]
    FrameIndex { index: usize, last: usize },

    /// スレッド番号が範囲外
    #[error("invalid thread index {index} (range is 0-{last})")]
    ThreadIndex { index: usize, last: usize },
}

/// プロセスにアタッチしていない
pub const ERR_NOT_ATTACHED: &str = "not attached to a process";

/// デバッグ情報が読み込まれていない
pub const ERR_NO_DEBUG_INFO: &str = "debug information is not loaded";
