//! Installed-game discovery.
//!
//! Scans a Steam installation the way the Steam client lays it out: the root
//! `steamapps/libraryfolders.vdf` names every library volume, and each
//! library's `appmanifest_<appid>.acf` carries the game's name and appid.
//! Both files are the same quote-delimited key/value format, parsed here
//! line-by-line without a full VDF parser. Launch targets use the
//! `steam://rungameid/` protocol handler, so every catalog entry is an
//! indirect launch.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Immutable descriptor for one launchable game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRef {
    pub name: String,
    /// Steam appid when the game came from a Steam library.
    pub app_id: Option<String>,
    pub target: LaunchTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Direct executable spawn; the child pid is the game (or its launcher).
    Executable(PathBuf),
    /// Protocol-handler launch (`steam://rungameid/…`). The spawned process
    /// is the shell, not the game - the tracker must discover the real
    /// process heuristically.
    Uri(String),
}

impl GameRef {
    pub fn is_indirect(&self) -> bool {
        matches!(self.target, LaunchTarget::Uri(_))
    }

    /// Lowercased name token used to match OS processes against this game:
    /// the executable stem for direct launches, the sanitized title for
    /// indirect ones.
    pub fn match_token(&self) -> String {
        match &self.target {
            LaunchTarget::Executable(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            LaunchTarget::Uri(_) => self
                .name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase(),
        }
    }

    /// Steam install-directory token (`steamapps/common/<dir>`) derived from
    /// a direct executable path, if any. Processes whose image path contains
    /// this token belong to the same install.
    pub fn install_dir_token(&self) -> Option<String> {
        let LaunchTarget::Executable(path) = &self.target else {
            return None;
        };
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            if component.as_os_str().eq_ignore_ascii_case("common") {
                return components
                    .next()
                    .map(|c| c.as_os_str().to_string_lossy().to_lowercase());
            }
        }
        None
    }
}

/// Steam library-cache artwork for one appid. Paths are returned only when
/// the files exist; the images themselves are never touched here.
#[derive(Debug, Clone, Default)]
pub struct Artwork {
    pub header: Option<PathBuf>,
    pub hero: Option<PathBuf>,
    pub logo: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Steam root not found at {0}")]
    RootMissing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Scan a Steam installation for installed games.
pub fn scan_steam_library(steam_root: &Path) -> Result<Vec<GameRef>, CatalogError> {
    if !steam_root.is_dir() {
        return Err(CatalogError::RootMissing(steam_root.to_path_buf()));
    }

    let mut games = Vec::new();
    for library in library_folders(steam_root) {
        let steamapps = library.join("steamapps");
        let entries = match fs::read_dir(&steamapps) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping library {}: {}", steamapps.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with("appmanifest_") || !file_name.ends_with(".acf") {
                continue;
            }
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Unreadable manifest {}: {}", path.display(), e);
                    continue;
                }
            };
            if let Some(game) = parse_app_manifest(&text) {
                debug!("Found {} (appid {:?})", game.name, game.app_id);
                games.push(game);
            }
        }
    }

    games.sort_by(|a, b| a.name.cmp(&b.name));
    games.dedup_by(|a, b| a.app_id.is_some() && a.app_id == b.app_id);
    info!("Steam scan found {} installed games", games.len());
    Ok(games)
}

/// Every library volume: the root itself plus each `"path"` entry from
/// `steamapps/libraryfolders.vdf`.
fn library_folders(steam_root: &Path) -> Vec<PathBuf> {
    let mut folders = vec![steam_root.to_path_buf()];

    let vdf = steam_root.join("steamapps").join("libraryfolders.vdf");
    let Ok(text) = fs::read_to_string(&vdf) else {
        return folders;
    };
    for line in text.lines() {
        if line.contains("\"path\"") {
            if let Some(value) = quoted_value(line) {
                let path = PathBuf::from(value.replace("\\\\", "\\"));
                if path.is_dir() && !folders.contains(&path) {
                    debug!("Found Steam library volume: {}", path.display());
                    folders.push(path);
                }
            }
        }
    }
    folders
}

/// Pull `"name"` and `"appid"` out of an appmanifest and build the indirect
/// launch target.
fn parse_app_manifest(text: &str) -> Option<GameRef> {
    let mut name = None;
    let mut app_id = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("\"name\"") {
            name = quoted_value(trimmed);
        } else if trimmed.starts_with("\"appid\"") {
            app_id = quoted_value(trimmed);
        }
        if name.is_some() && app_id.is_some() {
            break;
        }
    }

    let name = name?;
    let app_id = app_id?;
    Some(GameRef {
        target: LaunchTarget::Uri(format!("steam://rungameid/{}", app_id)),
        name: name.to_string(),
        app_id: Some(app_id.to_string()),
    })
}

/// Second quoted field of a `"key"  "value"` line.
fn quoted_value(line: &str) -> Option<&str> {
    line.split('"').nth(3)
}

/// Resolve library-cache artwork for a scanned game.
pub fn artwork_for(steam_root: &Path, app_id: &str) -> Artwork {
    let cache = steam_root.join("appcache").join("librarycache");
    let existing = |file: String| {
        let path = cache.join(file);
        path.is_file().then_some(path)
    };
    Artwork {
        header: existing(format!("{}_header.jpg", app_id)),
        hero: existing(format!("{}_library_hero.jpg", app_id)),
        logo: existing(format!("{}_logo.png", app_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MANIFEST: &str = r#"
"AppState"
{
	"appid"		"620"
	"Universe"		"1"
	"name"		"Portal 2"
	"StateFlags"		"4"
	"installdir"		"Portal 2"
}
"#;

    #[test]
    fn manifest_yields_an_indirect_steam_target() {
        let game = parse_app_manifest(MANIFEST).unwrap();
        assert_eq!(game.name, "Portal 2");
        assert_eq!(game.app_id.as_deref(), Some("620"));
        assert_eq!(
            game.target,
            LaunchTarget::Uri("steam://rungameid/620".into())
        );
        assert!(game.is_indirect());
    }

    #[test]
    fn manifest_without_name_is_skipped() {
        assert!(parse_app_manifest("\"AppState\"\n{\n\"appid\" \"10\"\n}").is_none());
    }

    #[test]
    fn scan_walks_manifests_under_the_root() {
        let root = tempfile::tempdir().unwrap();
        let steamapps = root.path().join("steamapps");
        fs::create_dir_all(&steamapps).unwrap();
        fs::write(steamapps.join("appmanifest_620.acf"), MANIFEST).unwrap();
        fs::write(steamapps.join("notamanifest.txt"), "ignored").unwrap();

        let games = scan_steam_library(root.path()).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "Portal 2");
    }

    #[test]
    fn library_folders_follow_vdf_path_entries() {
        let root = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        let steamapps = root.path().join("steamapps");
        fs::create_dir_all(&steamapps).unwrap();
        let vdf = format!(
            "\"libraryfolders\"\n{{\n\t\"1\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t}}\n}}\n",
            extra.path().display()
        );
        fs::write(steamapps.join("libraryfolders.vdf"), vdf).unwrap();

        let folders = library_folders(root.path());
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[1], extra.path());
    }

    #[test]
    fn artwork_paths_resolve_only_when_the_files_exist() {
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("appcache").join("librarycache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("620_header.jpg"), b"jpg").unwrap();

        let art = artwork_for(root.path(), "620");
        assert!(art.header.is_some());
        assert!(art.hero.is_none());
        assert!(art.logo.is_none());
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = scan_steam_library(Path::new("/definitely/not/steam")).unwrap_err();
        assert!(matches!(err, CatalogError::RootMissing(_)));
    }

    #[test]
    fn match_token_comes_from_stem_or_title() {
        let direct = GameRef {
            name: "Hollow Knight".into(),
            app_id: None,
            target: LaunchTarget::Executable(PathBuf::from(
                "C:/Steam/steamapps/common/Hollow Knight/hollow_knight.exe",
            )),
        };
        assert_eq!(direct.match_token(), "hollow_knight");
        assert_eq!(direct.install_dir_token().as_deref(), Some("hollow knight"));

        let indirect = GameRef {
            name: "Portal 2".into(),
            app_id: Some("620".into()),
            target: LaunchTarget::Uri("steam://rungameid/620".into()),
        };
        assert_eq!(indirect.match_token(), "portal2");
        assert_eq!(indirect.install_dir_token(), None);
    }
}
