//! 纯文本数值表.

use std::fs;
use std::path::Path;

use crate::error::{NormError, NormResult};

/// 读取以空白分隔的数值表, 并按读取顺序展平为一维序列.
///
/// 空行以及以 `#` 开头的行会被跳过. 这同时兼容 FSL 的单行 `.bval`
/// 文件和每行一个值的 delta 表.
pub fn read_table<P: AsRef<Path>>(path: P) -> NormResult<Vec<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| NormError::MetadataRead {
        path: path.to_owned(),
        source,
    })?;
    parse_table(&text, path)
}

/// 同 [`read_table`], 但直接解析已读入的文本. `path` 仅用于错误信息.
pub fn parse_table(text: &str, path: &Path) -> NormResult<Vec<f64>> {
    let mut ans = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        for token in line.split_whitespace() {
            match token.parse::<f64>() {
                Ok(v) if v.is_finite() => ans.push(v),
                _ => {
                    return Err(NormError::MetadataParse {
                        path: path.to_owned(),
                        line: line_no + 1,
                        token: token.to_string(),
                    })
                }
            }
        }
    }
    Ok(ans)
}
