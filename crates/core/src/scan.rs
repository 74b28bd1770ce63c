//! Local video discovery and the OpenSubtitles file fingerprint.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Size of the block hashed at each end of the file.
const HASH_CHUNK: u64 = 64 * 1024;

/// Container formats we look for when scanning a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mkv,
    Avi,
}

impl VideoFormat {
    /// File extension matched against the part after the last `.`.
    pub fn extension(self) -> &'static str {
        match self {
            VideoFormat::Mkv => "mkv",
            VideoFormat::Avi => "avi",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A video file with the data the search service needs to identify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
}

impl VideoFile {
    /// Read the size of `path` and fingerprint its contents.
    pub fn open(path: &Path) -> Result<Self> {
        trace!("VideoFile::open(path={})", path.display());
        let mut file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let size = file.metadata()?.len();
        let hash = compute_hash(&mut file, size)
            .with_context(|| format!("cannot hash {}", path.display()))?;
        debug!("{} hash={} size={}", path.display(), hash, size);
        Ok(Self {
            path: path.to_path_buf(),
            hash,
            size,
        })
    }
}

/// List the files directly inside `folder` whose extension is `format`.
/// Subdirectories are not descended into and the result is sorted by name.
pub fn list_videos(folder: &Path, format: VideoFormat) -> Result<Vec<PathBuf>> {
    trace!(
        "list_videos(folder={}, format={})",
        folder.display(),
        format
    );
    let entries = fs::read_dir(folder)
        .with_context(|| format!("cannot read folder {}", folder.display()))?;
    let mut videos = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("cannot read folder {}", folder.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext == format.extension())
            .unwrap_or(false);
        if matches {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// Compute the OpenSubtitles hash of a stream of `size` bytes.
/// The way this works is by starting from the size and adding every
/// little-endian 64-bit word of the first and last 64 KiB, wrapping on
/// overflow. The result is rendered as 16 lowercase hex digits.
pub fn compute_hash<R: Read + Seek>(reader: &mut R, size: u64) -> Result<String> {
    if size < HASH_CHUNK * 2 {
        return Err(anyhow!("file too small to hash ({size} bytes)"));
    }
    let mut buf = vec![0u8; HASH_CHUNK as usize];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut buf)?;
    let mut hash = add_words(size, &buf);
    reader.seek(SeekFrom::Start(size - HASH_CHUNK))?;
    reader.read_exact(&mut buf)?;
    hash = add_words(hash, &buf);
    Ok(format!("{hash:016x}"))
}

/// Add every little-endian u64 word of `chunk` to `acc`, wrapping on
/// overflow.
fn add_words(acc: u64, chunk: &[u8]) -> u64 {
    chunk.chunks_exact(8).fold(acc, |acc, bytes| {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        acc.wrapping_add(u64::from_le_bytes(word))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn lists_only_matching_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ep1.mkv"), b"video").unwrap();
        fs::write(dir.path().join("ep1.srt"), b"old subtitle").unwrap();
        fs::write(dir.path().join("notes.mkv.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("extras.mkv")).unwrap();

        let videos = list_videos(dir.path(), VideoFormat::Mkv).unwrap();
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ep1.mkv".to_string()]);
    }

    #[test]
    fn lists_sorted_by_name() {
        let dir = tempdir().unwrap();
        for name in ["b.avi", "a.avi", "c.mkv"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let videos = list_videos(dir.path(), VideoFormat::Avi).unwrap();
        assert_eq!(
            videos,
            vec![dir.path().join("a.avi"), dir.path().join("b.avi")]
        );
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_videos(&missing, VideoFormat::Mkv).is_err());
    }

    /// An all-zero stream hashes to its own length.
    #[test]
    fn hash_of_zeroes_is_size() {
        let size = HASH_CHUNK * 2;
        let mut data = Cursor::new(vec![0u8; size as usize]);
        assert_eq!(compute_hash(&mut data, size).unwrap(), "0000000000020000");
    }

    /// Words from both ends are added and the middle is skipped.
    #[test]
    fn hash_adds_head_and_tail_words() {
        let size = HASH_CHUNK * 3;
        let mut bytes = vec![0u8; size as usize];
        bytes[0] = 1;
        bytes[HASH_CHUNK as usize + 8] = 0xff;
        let tail = (size - 8) as usize;
        bytes[tail..].copy_from_slice(&0x0100u64.to_le_bytes());
        let mut data = Cursor::new(bytes);
        let expected = size + 1 + 0x0100;
        assert_eq!(
            compute_hash(&mut data, size).unwrap(),
            format!("{expected:016x}")
        );
    }

    #[test]
    fn hash_wraps_on_overflow() {
        let size = HASH_CHUNK * 2;
        let mut bytes = vec![0u8; size as usize];
        bytes[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        let mut data = Cursor::new(bytes);
        let expected = size.wrapping_add(u64::MAX);
        assert_eq!(
            compute_hash(&mut data, size).unwrap(),
            format!("{expected:016x}")
        );
    }

    #[test]
    fn small_files_cannot_be_hashed() {
        let mut data = Cursor::new(vec![0u8; 1024]);
        assert!(compute_hash(&mut data, 1024).is_err());
    }

    #[test]
    fn opens_video_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ep1.mkv");
        fs::write(&path, vec![0u8; (HASH_CHUNK * 2) as usize]).unwrap();
        let video = VideoFile::open(&path).unwrap();
        assert_eq!(video.size, HASH_CHUNK * 2);
        assert_eq!(video.hash, "0000000000020000");
        assert_eq!(video.path, path);
    }
}
