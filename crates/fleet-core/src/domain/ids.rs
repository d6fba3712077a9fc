//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID + Phantom type
//! すべての ID は `Id<T>` で包んだ ULID。`T` はサイズ 0 のマーカー型で、
//! コンパイル時にしか存在しない。`RegistryId` を期待する場所に `TaskId` を
//! 渡すことはできない。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 同じ `not_before` / `created_at` のタスクの最終的な並び順に使う
//! - **分散生成可能**: 調整なしで複数ノードで生成できる

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（`"task-"`, `"registry-"` など）を提供する。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// シリアライズはプレフィックス無しの ULID 文字列。プレフィックスは表示専用。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// システム時計から新しい ID を作る。
    ///
    /// engine 内部は `IdGenerator` を通す。これは時刻の決定性を気にしない
    /// 呼び出し側向け。
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// プレフィックス付きの表示形式と ULID 単体の両方を受け付ける
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Registry {}

impl IdMarker for Registry {
    fn prefix() -> &'static str {
        "registry-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deployment {}

impl IdMarker for Deployment {
    fn prefix() -> &'static str {
        "deployment-"
    }
}

/// 永続タスクの ID
pub type TaskId = Id<Task>;

/// 管理対象 registry インスタンスの ID
pub type RegistryId = Id<Registry>;

/// deployment target の ID
pub type DeploymentId = Id<Deployment>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_prefix() {
        let ulid = Ulid::new();

        assert!(TaskId::from_ulid(ulid).to_string().starts_with("task-"));
        assert!(RegistryId::from_ulid(ulid).to_string().starts_with("registry-"));
        assert!(
            DeploymentId::from_ulid(ulid)
                .to_string()
                .starts_with("deployment-")
        );
        // let _: TaskId = RegistryId::from_ulid(ulid); // <- コンパイルエラー
    }

    #[test]
    fn ids_are_sortable_by_creation_time() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = RegistryId::generate();

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: RegistryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = DeploymentId::generate();

        assert_eq!(id.to_string().parse::<DeploymentId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<DeploymentId>().unwrap(), id);
        assert!("registry-nonsense".parse::<RegistryId>().is_err());
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }
}
