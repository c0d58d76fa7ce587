//! REPLコマンドの解析

use crate::Result;
use anyhow::anyhow;

/// REPLコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// スレッド一覧を表示
    Threads,
    /// スレッドを選択
    Thread(usize),
    /// 現在スレッドのバックトレースを表示
    Backtrace,
    /// フレームを選択
    Frame(usize),
    /// 呼び出し元のフレームへ移動
    Up,
    /// 呼び出し先のフレームへ移動
    Down,
    /// 現在フレームの情報を表示
    Info,
    /// スコープ内の変数を一覧表示
    Vars,
    /// 式を評価して表示 ("print counter.value" / "print *ptr")
    Print(String),
    /// シンボルを検索
    Find(String),
    /// ヘルプを表示
    Help,
    /// 終了
    Quit,
}

/// 入力行をコマンドに解析する
pub fn parse(input: &str) -> Result<Command> {
    let mut parts = input.split_whitespace();
    let head = parts.next().ok_or_else(|| anyhow!("empty command"))?;

    let cmd = match head {
        "threads" | "tl" => Command::Threads,
        "thread" | "t" => Command::Thread(parse_index(parts.next(), "thread")?),
        "bt" | "backtrace" => Command::Backtrace,
        "frame" | "f" => Command::Frame(parse_index(parts.next(), "frame")?),
        "up" => Command::Up,
        "down" => Command::Down,
        "info" | "i" => Command::Info,
        "vars" | "v" => Command::Vars,
        "print" | "p" => {
            let expr = parts
                .next()
                .ok_or_else(|| anyhow!("usage: print <expr>"))?;
            Command::Print(expr.to_string())
        }
        "find" => {
            let pattern = parts
                .next()
                .ok_or_else(|| anyhow!("usage: find <pattern>"))?;
            Command::Find(pattern.to_string())
        }
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(anyhow!("unknown command: {}", other)),
    };
    Ok(cmd)
}

fn parse_index(arg: Option<&str>, what: &str) -> Result<usize> {
    let arg = arg.ok_or_else(|| anyhow!("usage: {} <number>", what))?;
    arg.parse()
        .map_err(|_| anyhow!("invalid {} number: {}", what, arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("threads").unwrap(), Command::Threads);
        assert_eq!(parse("bt").unwrap(), Command::Backtrace);
        assert_eq!(parse("up").unwrap(), Command::Up);
        assert_eq!(parse("down").unwrap(), Command::Down);
        assert_eq!(parse("vars").unwrap(), Command::Vars);
        assert_eq!(parse("q").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_with_arguments() {
        assert_eq!(parse("thread 2").unwrap(), Command::Thread(2));
        assert_eq!(parse("f 0").unwrap(), Command::Frame(0));
        assert_eq!(
            parse("print counter.value").unwrap(),
            Command::Print("counter.value".into())
        );
        assert_eq!(parse("p *ptr").unwrap(), Command::Print("*ptr".into()));
        assert_eq!(parse("find main").unwrap(), Command::Find("main".into()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("thread").is_err());
        assert!(parse("frame abc").is_err());
        assert!(parse("print").is_err());
        assert!(parse("unknowncmd").is_err());
    }
}
