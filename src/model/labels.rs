//! ラベルファイルの読み込み
//!
//! 1行1ラベルのテキスト。前後の空白は除去し、空行は無視します。
//! 行の順序がモデル出力のインデックスと対応します。

use std::path::Path;

use crate::error::ClassifierError;

/// ラベルテキストを解析
pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// ラベルファイルを読み込む
///
/// ファイルが存在しない、またはラベルが1つもない場合は `ModelLoad` エラー。
pub fn load_labels(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ClassifierError::ModelLoad(format!("cannot read label file {}: {}", path.display(), e))
    })?;

    let labels = parse_labels(&text);
    if labels.is_empty() {
        return Err(ClassifierError::ModelLoad(format!(
            "label file {} contains no labels",
            path.display()
        )));
    }
    Ok(labels)
}

/// ラベルファイルを書き出す（学習後のエクスポート用）
pub fn write_labels(path: &Path, labels: &[String]) -> std::io::Result<()> {
    let mut text = labels.join("\n");
    text.push('\n');
    std::fs::write(path, text)
}
