//! 疾患情報の参照
//!
//! ラベルをキーとする静的な疾患情報（JSON）を起動時に1度だけ読み込みます。
//! 読み込みに失敗しても分類は止めず、空のまま続行します。

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::InfoLoadError;

/// 表示色のデフォルト値
pub const DEFAULT_COLOR: &str = "#808080";

/// バイナリに同梱する疾患情報
const BUNDLED_DISEASE_INFO: &str = include_str!("../data/disease_info.json");

/// 疾患情報
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseInfo {
    pub name: String,
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: Vec<String>,
    pub treatment: Vec<String>,
    pub when_to_see_doctor: Vec<String>,
    pub severity: Option<String>,
    pub color: String,
}

/// JSON上の表現（欠けている項目を許容する）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDiseaseInfo {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    symptoms: Vec<String>,
    #[serde(default)]
    causes: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    treatment: Vec<String>,
    #[serde(default)]
    when_to_see_doctor: Vec<String>,
    #[serde(default)]
    severity: Option<String>,
    color: Option<String>,
}

impl RawDiseaseInfo {
    fn into_info(self, key: &str) -> DiseaseInfo {
        DiseaseInfo {
            name: self.name.unwrap_or_else(|| key.to_string()),
            description: self.description,
            symptoms: self.symptoms,
            causes: self.causes,
            treatment: self.treatment,
            when_to_see_doctor: self.when_to_see_doctor,
            severity: self.severity,
            color: self.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        }
    }
}

/// 文字列1つでも配列でも受け付ける
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// 疾患情報ストア（読み込み後は読み取り専用）
#[derive(Debug, Clone, Default)]
pub struct DiseaseInfoStore {
    records: HashMap<String, DiseaseInfo>,
}

impl DiseaseInfoStore {
    /// JSON文字列を解析
    pub fn parse(json: &str) -> Result<Self, InfoLoadError> {
        let raw: HashMap<String, RawDiseaseInfo> = serde_json::from_str(json)?;
        let records = raw
            .into_iter()
            .map(|(key, info)| {
                let info = info.into_info(&key);
                (key, info)
            })
            .collect();
        Ok(Self { records })
    }

    /// ファイルから読み込む
    pub fn try_load(path: &Path) -> Result<Self, InfoLoadError> {
        let json = std::fs::read_to_string(path).map_err(|source| InfoLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&json)
    }

    /// ファイルから読み込む。失敗した場合は警告を出して空のストアを返す
    pub fn load(path: &Path) -> Self {
        Self::try_load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "disease info unavailable");
            Self::default()
        })
    }

    /// 同梱データを読み込む
    pub fn bundled() -> Self {
        Self::parse(BUNDLED_DISEASE_INFO).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bundled disease info is invalid");
            Self::default()
        })
    }

    /// パス指定があればファイルから、無ければ同梱データを読み込む
    pub fn from_path_or_bundled(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::load(path),
            None => Self::bundled(),
        }
    }

    /// ラベルの疾患情報（未知のラベルなら None）
    pub fn get_info(&self, label: &str) -> Option<&DiseaseInfo> {
        self.records.get(label)
    }

    /// 表示名。未知のラベルはそのまま返す
    pub fn display_name(&self, label: &str) -> String {
        self.get_info(label)
            .map(|info| info.name.clone())
            .unwrap_or_else(|| label.to_string())
    }

    /// ラベル一覧（ソート済み）
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.records.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
