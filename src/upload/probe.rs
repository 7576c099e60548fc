use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use image::{ImageFormat, ImageReader};
use crate::core::{Dimensions, Result, UploadError};

/// Bytes read from the head of an image to find its dimensions
const PROBE_WINDOW: u64 = 64 * 1024;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Local facts about a payload file, gathered before any request is made
#[derive(Debug, Clone, PartialEq)]
pub struct FileProbe {
    pub path: PathBuf,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub dimensions: Option<Dimensions>,
}

impl FileProbe {
    /// Check that `path` is a readable file no larger than `limit` bytes.
    pub fn inspect(path: &Path, limit: u64) -> Result<Self> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::FileNotFound { path: path.to_path_buf() });
            }
            Err(err) => return Err(err.into()),
        };

        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )
            .into());
        }

        let size = metadata.len();
        if size > limit {
            return Err(UploadError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }

        let dimensions = match raster_format(path) {
            Some(_) => probe_dimensions(path),
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            filename: filename(path),
            mime: media_type(path).to_string(),
            size,
            dimensions,
        })
    }
}

/// Image formats accepted for dimension probing and thumbnails
pub fn raster_format(path: &Path) -> Option<ImageFormat> {
    ImageFormat::from_path(path).ok().filter(|format| {
        matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP | ImageFormat::Bmp
        )
    })
}

/// Media type from the file extension
pub fn media_type(path: &Path) -> &'static str {
    if let Some(format) = raster_format(path) {
        return format.to_mime_type();
    }

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => "application/json",
        "js" => "application/javascript",
        "txt" | "md" | "toml" | "rs" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => DEFAULT_MIME,
    }
}

/// Width and height from the leading bytes of an image. `None` when the
/// header is not within the window or the file is not an image.
pub fn probe_dimensions(path: &Path) -> Option<Dimensions> {
    let file = File::open(path).ok()?;
    let mut window = Vec::new();
    file.take(PROBE_WINDOW).read_to_end(&mut window).ok()?;

    let (width, height) = ImageReader::new(Cursor::new(window))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;

    Some(Dimensions { width, height })
}

pub fn filename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Default title: the file name without its extension
pub fn title_from_path(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

/// Extension including the leading dot, or an empty string
pub fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file() {
        let err = FileProbe::inspect(Path::new("does-not-exist"), 1024).unwrap_err();
        assert_eq!(err.code(), Some("ENOENT"));
        assert_eq!(err.path(), Some(Path::new("does-not-exist")));
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let err = FileProbe::inspect(&path, 100).unwrap_err();
        match err {
            UploadError::FileTooLarge { size, limit, .. } => {
                assert_eq!(size, 128);
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected error {:?}", other),
        }

        // exactly at the limit is fine
        assert!(FileProbe::inspect(&path, 128).is_ok());
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileProbe::inspect(dir.path(), 1024).unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[test]
    fn test_png_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maru.png");
        image::RgbImage::new(7, 3).save(&path).unwrap();

        let probe = FileProbe::inspect(&path, 1024 * 1024).unwrap();
        assert_eq!(probe.mime, "image/png");
        assert_eq!(probe.filename, "maru.png");
        assert_eq!(probe.dimensions, Some(Dimensions { width: 7, height: 3 }));
    }

    #[test]
    fn test_broken_image_has_no_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"definitely not a jpeg").unwrap();

        let probe = FileProbe::inspect(&path, 1024).unwrap();
        assert_eq!(probe.mime, "image/jpeg");
        assert_eq!(probe.dimensions, None);
    }

    #[test]
    fn test_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, b"{}").unwrap();

        let probe = FileProbe::inspect(&path, 1024).unwrap();
        assert_eq!(probe.mime, "application/json");
        assert_eq!(probe.size, 2);
        assert_eq!(probe.dimensions, None);
    }

    #[test]
    fn test_name_helpers() {
        let path = Path::new("examples/files/maru-1.jpg");
        assert_eq!(filename(path), "maru-1.jpg");
        assert_eq!(title_from_path(path).as_deref(), Some("maru-1"));
        assert_eq!(extension(path), ".jpg");
        assert_eq!(extension(Path::new("Makefile")), "");
        assert_eq!(media_type(Path::new("Makefile")), DEFAULT_MIME);
        assert!(raster_format(Path::new("a.svg")).is_none());
        assert!(raster_format(Path::new("a.PNG")).is_some());
    }
}
