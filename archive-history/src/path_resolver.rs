//! Station folder resolution
//!
//! Maps a station context to its archive root under the stations root.
//! A stored folder token takes priority and is used verbatim; otherwise the
//! display title is turned into a canonical folder name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// `"Big River (05AB001)"` style display titles
static TITLE_WITH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)\s*\(([^)]+)\)\s*$").expect("valid title regex"));

static NON_FOLDER_SAFE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Z0-9]+").expect("valid folder-safe regex"));

/// What the caller knows about the station being viewed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationContext {
    /// Folder token stored with the station, if any
    #[serde(default)]
    pub folder: Option<String>,
    /// Station display title
    #[serde(default)]
    pub title: Option<String>,
}

impl StationContext {
    pub fn from_folder(folder: impl Into<String>) -> Self {
        Self {
            folder: Some(folder.into()),
            title: None,
        }
    }

    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            folder: None,
            title: Some(title.into()),
        }
    }
}

/// Resolved archive location of one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationLocation {
    pub folder_name: String,
    pub root_path: PathBuf,
}

/// Uppercase, collapse every run outside `[A-Z0-9]` to `_`, strip edge `_`
pub fn to_folder_safe(s: &str) -> String {
    let upper = s.trim().to_uppercase();
    NON_FOLDER_SAFE
        .replace_all(&upper, "_")
        .trim_matches('_')
        .to_string()
}

/// Remove only characters the filesystem forbids; spaces are kept
pub fn to_fs_safe(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Canonical folder name for a display title
///
/// `"Title (ID)"` becomes `TITLE_ID`; any other title is sanitized whole.
pub fn folder_name_from_title(title: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    let folder = match TITLE_WITH_ID.captures(title) {
        Some(caps) => {
            let name = to_folder_safe(&caps[1]);
            let id = to_folder_safe(&caps[2]);
            match (name.is_empty(), id.is_empty()) {
                (false, false) => format!("{}_{}", name, id),
                (true, _) => id,
                (false, true) => name,
            }
        }
        None => to_folder_safe(title),
    };

    if folder.is_empty() {
        None
    } else {
        Some(folder)
    }
}

/// A stored token must name exactly one directory below the stations root
fn is_single_component(token: &str) -> bool {
    let mut components = Path::new(token).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Resolves station contexts against a fixed stations root
#[derive(Debug, Clone)]
pub struct PathResolver {
    stations_root: PathBuf,
}

impl PathResolver {
    pub fn new(stations_root: impl Into<PathBuf>) -> Self {
        Self {
            stations_root: stations_root.into(),
        }
    }

    pub fn stations_root(&self) -> &Path {
        &self.stations_root
    }

    /// Resolve `ctx`, or `None` when no usable station context exists
    pub fn resolve(&self, ctx: &StationContext) -> Option<StationLocation> {
        let folder_name = match ctx.folder.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                if !is_single_component(token) {
                    warn!("Rejecting station folder token {:?}", token);
                    return None;
                }
                token.to_string()
            }
            _ => folder_name_from_title(ctx.title.as_deref()?)?,
        };

        debug!("Resolved station folder {}", folder_name);
        Some(StationLocation {
            root_path: self.stations_root.join(&folder_name),
            folder_name,
        })
    }
}
