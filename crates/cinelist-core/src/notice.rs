//! User-facing notices for mutation outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::gateway::ApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ko,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "ko" => Ok(Locale::Ko),
            other => Err(format!("unknown locale '{other}' (expected en or ko)")),
        }
    }
}

/// A user-visible operation that can succeed or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    LoadLists,
    LoadList,
    CreateList,
    UpdateList,
    DeleteList,
    AddItem,
    RemoveItem,
    ClearList,
    ToggleFavorite,
    ToggleWatchlist,
    Rate,
    DeleteRating,
    LoadAccount,
    SignIn,
    SignOut,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::LoadLists => "load lists",
            Action::LoadList => "load list",
            Action::CreateList => "create list",
            Action::UpdateList => "update list",
            Action::DeleteList => "delete list",
            Action::AddItem => "add item",
            Action::RemoveItem => "remove item",
            Action::ClearList => "clear list",
            Action::ToggleFavorite => "toggle favorite",
            Action::ToggleWatchlist => "toggle watchlist",
            Action::Rate => "rate",
            Action::DeleteRating => "delete rating",
            Action::LoadAccount => "load account",
            Action::SignIn => "sign in",
            Action::SignOut => "sign out",
        }
    }

    fn failure_fallback(self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => match self {
                Action::LoadLists | Action::LoadList => "Couldn't load your lists.",
                Action::CreateList => "Couldn't create the list.",
                Action::UpdateList => "Couldn't update the list.",
                Action::DeleteList => "Couldn't delete the list.",
                Action::AddItem => "Couldn't add the title to the list.",
                Action::RemoveItem => "Couldn't remove the title from the list.",
                Action::ClearList => "Couldn't clear the list.",
                Action::ToggleFavorite => "Couldn't update favorites.",
                Action::ToggleWatchlist => "Couldn't update the watchlist.",
                Action::Rate | Action::DeleteRating => "Couldn't save the rating.",
                Action::LoadAccount => "Couldn't load account details.",
                Action::SignIn => "Sign-in failed.",
                Action::SignOut => "Sign-out failed.",
            },
            Locale::Ko => match self {
                Action::LoadLists | Action::LoadList => "리스트를 불러오지 못했습니다.",
                Action::CreateList => "리스트를 만들지 못했습니다.",
                Action::UpdateList => "리스트를 수정하지 못했습니다.",
                Action::DeleteList => "리스트 삭제에 실패했습니다.",
                Action::AddItem => "영화를 리스트에 추가하지 못했습니다.",
                Action::RemoveItem => "영화를 리스트에서 제거하지 못했습니다.",
                Action::ClearList => "리스트를 비우지 못했습니다.",
                Action::ToggleFavorite => "즐겨찾기를 변경하지 못했습니다.",
                Action::ToggleWatchlist => "워치리스트를 변경하지 못했습니다.",
                Action::Rate | Action::DeleteRating => "평점을 저장하지 못했습니다.",
                Action::LoadAccount => "계정 정보를 불러오지 못했습니다.",
                Action::SignIn => "로그인에 실패했습니다.",
                Action::SignOut => "로그아웃에 실패했습니다.",
            },
        }
    }

    fn success_message(self, locale: Locale) -> Option<&'static str> {
        Some(match locale {
            Locale::En => match self {
                Action::CreateList => "List created.",
                Action::UpdateList => "List updated.",
                Action::DeleteList => "List deleted.",
                Action::AddItem => "Added to the list.",
                Action::RemoveItem => "Removed from the list.",
                Action::ClearList => "List cleared.",
                Action::SignIn => "Signed in.",
                Action::SignOut => "Signed out.",
                _ => return None,
            },
            Locale::Ko => match self {
                Action::CreateList => "리스트가 생성되었습니다.",
                Action::UpdateList => "리스트가 수정되었습니다.",
                Action::DeleteList => "리스트가 삭제되었습니다.",
                Action::AddItem => "리스트에 추가되었습니다.",
                Action::RemoveItem => "리스트에서 제거되었습니다.",
                Action::ClearList => "리스트를 비웠습니다.",
                Action::SignIn => "로그인되었습니다.",
                Action::SignOut => "로그아웃되었습니다.",
                _ => return None,
            },
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's `status_message` when it sent one, otherwise a generic
/// message for `action`.
pub fn failure_message(action: Action, error: &ApiError, locale: Locale) -> String {
    match error.remote_message() {
        Some(message) => message.to_string(),
        None => action.failure_fallback(locale).to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub action: Action,
    pub message: String,
}

/// Broadcast channel for notices. Publishing with no subscribers is fine.
#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
    locale: Locale,
}

impl Notices {
    pub fn new(locale: Locale) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx, locale }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn failure(&self, action: Action, error: &ApiError) -> Notice {
        let notice = Notice {
            level: NoticeLevel::Error,
            action,
            message: failure_message(action, error, self.locale),
        };
        let _ = self.tx.send(notice.clone());
        notice
    }

    pub fn success(&self, action: Action) {
        if let Some(message) = action.success_message(self.locale) {
            let _ = self.tx.send(Notice {
                level: NoticeLevel::Success,
                action,
                message: message.to_string(),
            });
        }
    }

    /// A notice that is not tied to a remote error, e.g. "sign in required".
    pub fn error(&self, action: Action, message: impl Into<String>) {
        let _ = self.tx.send(Notice {
            level: NoticeLevel::Error,
            action,
            message: message.into(),
        });
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(Locale::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_server_message() {
        let err = ApiError::NotFound {
            message: "The resource you requested could not be found.".into(),
        };
        assert_eq!(
            failure_message(Action::RemoveItem, &err, Locale::En),
            "The resource you requested could not be found."
        );
    }

    #[test]
    fn falls_back_to_generic_message() {
        assert_eq!(
            failure_message(Action::DeleteList, &ApiError::Timeout, Locale::En),
            "Couldn't delete the list."
        );
        assert_eq!(
            failure_message(Action::DeleteList, &ApiError::Timeout, Locale::Ko),
            "리스트 삭제에 실패했습니다."
        );
    }

    #[tokio::test]
    async fn subscribers_receive_notices() {
        let notices = Notices::default();
        let mut rx = notices.subscribe();
        notices.failure(Action::AddItem, &ApiError::Network("reset".into()));
        notices.success(Action::AddItem);
        notices.success(Action::LoadLists);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.level, NoticeLevel::Error);
        assert_eq!(first.message, "Couldn't add the title to the list.");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, NoticeLevel::Success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn locale_parses() {
        assert_eq!("KO".parse::<Locale>().unwrap(), Locale::Ko);
        assert!("fr".parse::<Locale>().is_err());
    }
}
