use crate::error::StreamError;
use std::path::{Path, PathBuf};

const MEDIA_TYPE_PLAYLIST: &str = "application/vnd.apple.mpegurl";
const MEDIA_TYPE_SEGMENT: &str = "video/mp2t";
const MEDIA_TYPE_BINARY: &str = "application/octet-stream";

const MAX_CAMERA_ID_LEN: usize = 128;

/// A resolved file inside a camera's output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub media_type: &'static str,
}

impl SegmentFile {
    pub fn is_playlist(&self) -> bool {
        self.media_type == MEDIA_TYPE_PLAYLIST
    }
}

pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("m3u8") => MEDIA_TYPE_PLAYLIST,
        Some("ts") => MEDIA_TYPE_SEGMENT,
        _ => MEDIA_TYPE_BINARY,
    }
}

/// Camera ids become directory names, so only a safe character set is accepted
pub fn validate_camera_id(camera_id: &str) -> Result<(), StreamError> {
    let valid = !camera_id.is_empty()
        && camera_id.len() <= MAX_CAMERA_ID_LEN
        && camera_id != "."
        && camera_id != ".."
        && camera_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StreamError::InvalidCameraId {
            camera_id: camera_id.to_string(),
        })
    }
}

/// Lexical checks done before any filesystem access
pub fn validate_relative_path(relative: &str) -> Result<(), StreamError> {
    let rejected = relative.is_empty()
        || relative.contains("..")
        || relative.starts_with('/')
        || relative.contains('\\')
        || relative.contains(':')
        || relative.contains('\0');

    if rejected {
        Err(StreamError::SegmentNotFound {
            path: relative.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Resolve `relative` inside `camera_dir`, refusing anything that escapes it
pub async fn resolve_in_dir(camera_dir: &Path, relative: &str) -> Result<SegmentFile, StreamError> {
    validate_relative_path(relative)?;

    let not_found = || StreamError::SegmentNotFound {
        path: relative.to_string(),
    };

    let base = tokio::fs::canonicalize(camera_dir)
        .await
        .map_err(|_| not_found())?;
    let full = tokio::fs::canonicalize(base.join(relative))
        .await
        .map_err(|_| not_found())?;

    if !full.starts_with(&base) {
        tracing::warn!(path = %relative, "Rejected segment path outside camera directory");
        return Err(not_found());
    }

    let metadata = tokio::fs::metadata(&full).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    Ok(SegmentFile {
        media_type: media_type_for(&full),
        path: full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_types() {
        assert_eq!(media_type_for(Path::new("index.m3u8")), MEDIA_TYPE_PLAYLIST);
        assert_eq!(media_type_for(Path::new("segment_00001.TS")), MEDIA_TYPE_SEGMENT);
        assert_eq!(media_type_for(Path::new("init.mp4")), MEDIA_TYPE_BINARY);
        assert_eq!(media_type_for(Path::new("noext")), MEDIA_TYPE_BINARY);
    }

    #[test]
    fn test_camera_id_validation() {
        assert!(validate_camera_id("cam-1").is_ok());
        assert!(validate_camera_id("lobby_east.2").is_ok());
        assert!(validate_camera_id("").is_err());
        assert!(validate_camera_id("..").is_err());
        assert!(validate_camera_id("cam/1").is_err());
        assert!(validate_camera_id("cam 1").is_err());
    }

    #[test]
    fn test_relative_path_validation() {
        assert!(validate_relative_path("index.m3u8").is_ok());
        assert!(validate_relative_path("sub/segment_00001.ts").is_ok());
        assert!(validate_relative_path("../../etc/passwd").is_err());
        assert!(validate_relative_path("segment..ts").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("..\\windows").is_err());
        assert!(validate_relative_path("C:/x").is_err());
        assert!(validate_relative_path("").is_err());
    }

    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let root = tempfile::tempdir().unwrap();
        let camera_dir = root.path().join("cam-1");
        std::fs::create_dir_all(&camera_dir).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"nope").unwrap();
        std::fs::write(camera_dir.join("index.m3u8"), b"#EXTM3U\n").unwrap();

        #[cfg(unix)]
        std::os::unix::fs::symlink(root.path().join("secret.txt"), camera_dir.join("leak.ts"))
            .unwrap();

        let ok = resolve_in_dir(&camera_dir, "index.m3u8").await.unwrap();
        assert!(ok.is_playlist());

        #[cfg(unix)]
        assert!(resolve_in_dir(&camera_dir, "leak.ts").await.is_err());

        assert!(resolve_in_dir(&camera_dir, "missing.ts").await.is_err());
    }
}
