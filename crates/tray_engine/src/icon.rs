//! Best-effort lookup of icon files by name, and decoding them into [`Surface`]s.
//!
//! This doesn't implement the full freedesktop icon theme lookup (no `index.theme`
//! parsing, no inheritance). It probes a fixed list of locations and the first existing file
//! wins.

use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::atomic::{AtomicUsize, Ordering},
};

use itertools::Itertools;

use crate::{surface::Surface, Error, Result};

const MAX_DATA_DIRS: usize = 8;
const SYSTEM_PIXMAPS: &str = "/usr/share/pixmaps";

const NAME_EXTENSIONS: &[&str] = &[".png", ".svg", ".svgz", ".xpm"];
const PIXMAP_EXTENSIONS: &[&str] = &[".png", ".svg", ".xpm"];
const SCALABLE_EXTENSIONS: &[&str] = &[".svg", ".svgz", ".png"];
const SIZED_EXTENSIONS: &[&str] = &[".png", ".svg", ".svgz", ".xpm", ".icon"];
const SIZES: &[&str] = &["128x128", "64x64", "48x48", "32x32", "24x24", "16x16"];
const ICON_CLASSES: &[&str] = &["status", "apps"];

/// Resolution used when a vector icon has to go through `rsvg-convert`.
const SVG_FALLBACK_PX: u32 = 64;

/// Trim an icon name as sent by an item: leading whitespace is dropped and anything after the
/// first whitespace is ignored.
pub fn clean_icon_name(name: &str) -> &str {
    let name = name.trim_start();
    name.split_whitespace().next().unwrap_or("")
}

/// Searches icon files by name.
#[derive(Debug, Clone)]
pub struct IconResolver {
    data_dirs: Vec<PathBuf>,
    pixmap_dir: PathBuf,
}

impl Default for IconResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

impl IconResolver {
    /// Build a resolver from `XDG_DATA_HOME` and `XDG_DATA_DIRS`.
    pub fn from_env() -> Self {
        let home = std::env::var("XDG_DATA_HOME")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".local/share")));
        let system = std::env::var("XDG_DATA_DIRS")
            .ok()
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
        let data_dirs = home
            .into_iter()
            .chain(system.split(':').filter(|dir| !dir.is_empty()).map(PathBuf::from))
            .take(MAX_DATA_DIRS)
            .collect();
        IconResolver { data_dirs, pixmap_dir: PathBuf::from(SYSTEM_PIXMAPS) }
    }

    /// Build a resolver over explicit directories.
    pub fn with_dirs(data_dirs: Vec<PathBuf>, pixmap_dir: impl Into<PathBuf>) -> Self {
        let mut data_dirs = data_dirs;
        data_dirs.truncate(MAX_DATA_DIRS);
        IconResolver { data_dirs, pixmap_dir: pixmap_dir.into() }
    }

    pub fn data_dirs(&self) -> &[PathBuf] {
        &self.data_dirs
    }

    /// Find a file for `name`. A name containing `/` is a path and is never searched for.
    pub fn best_icon_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.contains('/') {
            return Path::new(name).is_file().then(|| PathBuf::from(name));
        }
        if let Some(path) = first_with_extension(Path::new(""), name, NAME_EXTENSIONS) {
            return Some(path);
        }
        let pixmap = self.pixmap_dir.join(name);
        if pixmap.is_file() {
            return Some(pixmap);
        }

        for data_dir in &self.data_dirs {
            for theme in theme_dirs(&data_dir.join("icons")) {
                if let Some(path) = best_icon_path_in_dir(&theme, name) {
                    return Some(path);
                }
            }
            if let Some(path) = first_with_extension(&data_dir.join("pixmaps"), name, PIXMAP_EXTENSIONS) {
                return Some(path);
            }
        }

        first_with_extension(&self.pixmap_dir, name, PIXMAP_EXTENSIONS).or_else(|| {
            log::debug!("no icon file found for {:?}", name);
            None
        })
    }
}

/// Look for `name` inside one theme-like directory, such as an item's `IconThemePath`.
pub fn best_icon_path_in_dir(base: &Path, name: &str) -> Option<PathBuf> {
    search_theme_dir(base, name, true)
}

fn search_theme_dir(base: &Path, name: &str, descend_hicolor: bool) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let hicolor = base.join("hicolor");
    if descend_hicolor && hicolor.is_dir() {
        if let Some(path) = search_theme_dir(&hicolor, name, false) {
            return Some(path);
        }
    }
    if let Some(path) = first_with_extension(base, name, NAME_EXTENSIONS) {
        return Some(path);
    }
    let doubled = base.join(format!("{name}@2x.png"));
    if doubled.is_file() {
        return Some(doubled);
    }
    for ext in SCALABLE_EXTENSIONS {
        for class in ICON_CLASSES {
            let path = base.join("scalable").join(class).join(format!("{name}{ext}"));
            if path.is_file() {
                return Some(path);
            }
        }
    }
    for size in SIZES {
        for class in ICON_CLASSES {
            let dir = base.join(size).join(class);
            if let Some(path) = first_with_extension(&dir, name, SIZED_EXTENSIONS) {
                return Some(path);
            }
            let symbolic = dir.join(format!("{name}-symbolic.png"));
            if symbolic.is_file() {
                return Some(symbolic);
            }
        }
    }
    None
}

fn first_with_extension(dir: &Path, name: &str, extensions: &[&str]) -> Option<PathBuf> {
    extensions.iter().map(|ext| dir.join(format!("{name}{ext}"))).find(|path| path.is_file())
}

/// The non-hidden subdirectories of an `icons` directory, in name order.
fn theme_dirs(icons: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(icons) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .sorted()
        .collect()
}

fn is_vector(path: &Path) -> bool {
    matches!(path.extension().and_then(|ext| ext.to_str()), Some("svg" | "svgz"))
}

/// Decode an icon file into a surface that fits in `px × px`.
pub fn decode_icon_file(path: &Path, px: i32) -> Result<Surface> {
    if is_vector(path) {
        return decode_vector(path, px);
    }
    decode_raster(path, px)
}

fn decode_raster(path: &Path, px: i32) -> Result<Surface> {
    let image = image::open(path).map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))?;
    let target = px.max(1) as u32;
    let image = if image.width() != target || image.height() != target {
        image.resize(target, target, image::imageops::FilterType::Lanczos3)
    } else {
        image
    };
    let rgba = image.to_rgba8();
    Surface::from_rgba(rgba.width() as i32, rgba.height() as i32, rgba.as_raw())
        .ok_or_else(|| Error::Decode(format!("{}: empty image", path.display())))
}

/// Render a vector icon through `rsvg-convert`, since we don't link a vector renderer.
fn decode_vector(path: &Path, px: i32) -> Result<Surface> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let out = std::env::temp_dir().join(format!(
        "tray-engine-{}-{}.png",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let status = Command::new("rsvg-convert")
        .arg("-w")
        .arg(SVG_FALLBACK_PX.to_string())
        .arg("-h")
        .arg(SVG_FALLBACK_PX.to_string())
        .arg("-o")
        .arg(&out)
        .arg(path)
        .status();
    let result = match status {
        Ok(status) if status.success() => decode_raster(&out, px),
        Ok(status) => Err(Error::Decode(format!("rsvg-convert exited with {} for {}", status, path.display()))),
        Err(e) => Err(Error::Io(e)),
    };
    let _ = std::fs::remove_file(&out);
    result
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A scratch directory that is removed when dropped.
    pub(crate) struct ScratchDir(pub PathBuf);

    impl ScratchDir {
        pub(crate) fn new(label: &str) -> Self {
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            let dir = std::env::temp_dir().join(format!(
                "tray-engine-test-{}-{}-{}",
                label,
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&dir).unwrap();
            ScratchDir(dir)
        }

        pub(crate) fn touch(&self, rel: &str) -> PathBuf {
            let path = self.0.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"").unwrap();
            path
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_clean_icon_name() {
        assert_eq!(clean_icon_name("  nm-applet extra"), "nm-applet");
        assert_eq!(clean_icon_name("steam"), "steam");
        assert_eq!(clean_icon_name("   "), "");
    }

    #[test]
    fn test_theme_dir_prefers_hicolor_then_larger_sizes() {
        let dir = ScratchDir::new("theme");
        dir.touch("16x16/apps/app.png");
        dir.touch("48x48/status/app.png");
        assert_eq!(best_icon_path_in_dir(&dir.0, "app"), Some(dir.0.join("48x48/status/app.png")));

        let hicolor = dir.touch("hicolor/24x24/apps/app.png");
        assert_eq!(best_icon_path_in_dir(&dir.0, "app"), Some(hicolor));
    }

    #[test]
    fn test_theme_dir_scalable_and_symbolic() {
        let dir = ScratchDir::new("scalable");
        let symbolic = dir.touch("32x32/status/net-symbolic.png");
        assert_eq!(best_icon_path_in_dir(&dir.0, "net"), Some(symbolic));
        let scalable = dir.touch("scalable/apps/net.svg");
        assert_eq!(best_icon_path_in_dir(&dir.0, "net"), Some(scalable));
        let flat = dir.touch("net.xpm");
        assert_eq!(best_icon_path_in_dir(&dir.0, "net"), Some(flat));
    }

    #[test]
    fn test_resolver_search_order() {
        let data = ScratchDir::new("data");
        let pixmaps = ScratchDir::new("pixmaps");
        let resolver = IconResolver::with_dirs(vec![data.0.clone()], &pixmaps.0);

        assert_eq!(resolver.best_icon_path("volume"), None);

        let fallback = pixmaps.touch("volume.xpm");
        assert_eq!(resolver.best_icon_path("volume"), Some(fallback));

        let data_pixmap = data.touch("pixmaps/volume.png");
        assert_eq!(resolver.best_icon_path("volume"), Some(data_pixmap));

        let themed = data.touch("icons/Adwaita/64x64/apps/volume.png");
        assert_eq!(resolver.best_icon_path("volume"), Some(themed.clone()));

        // hidden theme directories are skipped
        data.touch("icons/.cache/volume.png");
        assert_eq!(resolver.best_icon_path("volume"), Some(themed));

        let literal = pixmaps.touch("volume");
        assert_eq!(resolver.best_icon_path("volume"), Some(literal));
    }

    #[test]
    fn test_absolute_path_is_used_directly() {
        let dir = ScratchDir::new("abs");
        let path = dir.touch("some/where/icon.png");
        let resolver = IconResolver::with_dirs(vec![], &dir.0);
        assert_eq!(resolver.best_icon_path(path.to_str().unwrap()), Some(path));
    }

    #[test]
    fn test_missing_path_is_not_searched() {
        let data = ScratchDir::new("missing-path");
        let pixmaps = ScratchDir::new("missing-path-pixmaps");
        data.touch("pixmaps/apps/volume.png");
        data.touch("icons/Adwaita/64x64/apps/volume.png");
        pixmaps.touch("apps/volume.xpm");
        let resolver = IconResolver::with_dirs(vec![data.0.clone()], &pixmaps.0);

        assert_eq!(resolver.best_icon_path("apps/volume"), None);
        assert_eq!(resolver.best_icon_path("/nonexistent/volume"), None);
        assert_eq!(resolver.best_icon_path("volume"), Some(data.0.join("icons/Adwaita/64x64/apps/volume.png")));
    }

    #[test]
    fn test_decode_scales_to_target() {
        let dir = ScratchDir::new("decode");
        let small = dir.0.join("small.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255])).save(&small).unwrap();
        let surface = decode_icon_file(&small, 16).unwrap();
        assert_eq!((surface.width(), surface.height()), (16, 16));

        let exact = dir.0.join("exact.png");
        image::RgbaImage::from_pixel(16, 16, image::Rgba([255, 0, 0, 128])).save(&exact).unwrap();
        let surface = decode_icon_file(&exact, 16).unwrap();
        assert_eq!(surface.pixel(3, 3), Some(0x8080_0000));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let dir = ScratchDir::new("garbage");
        let path = dir.touch("broken.png");
        assert!(decode_icon_file(&path, 16).is_err());
    }
}
