//! Naming, decoding and writing of downloaded subtitles.

use crate::select::{or_absent, Choice};
use crate::service::EncodedSubtitle;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Subtitle file ids queued for download with the paths they are saved to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    entries: BTreeMap<String, Vec<PathBuf>>,
}

impl DownloadRequest {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `file_id` to be written to `path`.
    /// A path already claimed by another id is rejected; the same id may be
    /// saved to several paths when several videos chose it.
    pub fn queue(&mut self, file_id: impl Into<String>, path: PathBuf) -> Result<()> {
        let file_id = file_id.into();
        if let Some((other, _)) = self
            .entries
            .iter()
            .find(|(id, paths)| **id != file_id && paths.contains(&path))
        {
            return Err(anyhow!(
                "{} is already queued for subtitle file {}",
                path.display(),
                other
            ));
        }
        let paths = self.entries.entry(file_id).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
        Ok(())
    }

    /// Ids to pass to the bulk download call.
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Paths queued for `file_id`, if it was queued at all.
    pub fn paths(&self, file_id: &str) -> Option<&[PathBuf]> {
        self.entries.get(file_id).map(Vec::as_slice)
    }

    /// Number of distinct subtitle files queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been queued yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the save path for a chosen subtitle inside `folder`.
/// The name is `S{season}E{episode}_{rank}_{language}_{file name}_{encoding}_ID-{file id}.srt`
/// where `rank` is the effective rank of the choice.
pub fn destination_path(folder: &Path, choice: &Choice) -> PathBuf {
    let c = &choice.candidate;
    folder.join(format!(
        "S{}E{}_{}_{}_{}_{}_ID-{}.srt",
        or_absent(&c.season),
        or_absent(&c.episode),
        choice.rank,
        or_absent(&c.language_id),
        or_absent(&c.file_name),
        or_absent(&c.encoding),
        or_absent(&c.subtitle_file_id),
    ))
}

/// Decode a download payload: base64 first, then gzip.
pub fn decode_payload(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let compressed = STANDARD
        .decode(cleaned)
        .context("subtitle payload is not valid base64")?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("subtitle payload is not valid gzip")?;
    Ok(out)
}

/// Decode every downloaded subtitle and write it to its queued paths.
/// Nothing is written unless every requested id came back and decoded.
/// Existing files are overwritten. Returns the written paths.
pub fn persist(request: &DownloadRequest, subtitles: Vec<EncodedSubtitle>) -> Result<Vec<PathBuf>> {
    trace!(
        "persist(requested={}, received={})",
        request.len(),
        subtitles.len()
    );
    let mut decoded = Vec::with_capacity(subtitles.len());
    for subtitle in subtitles {
        let Some(paths) = request.paths(&subtitle.file_id) else {
            warn!("ignoring unrequested subtitle file {}", subtitle.file_id);
            continue;
        };
        let bytes = decode_payload(&subtitle.data)
            .with_context(|| format!("cannot decode subtitle file {}", subtitle.file_id))?;
        debug!("decoded subtitle file {} ({} bytes)", subtitle.file_id, bytes.len());
        decoded.push((subtitle.file_id, paths, bytes));
    }
    let missing: Vec<String> = request
        .ids()
        .into_iter()
        .filter(|id| !decoded.iter().any(|(file_id, _, _)| file_id == id))
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!(
            "subtitle files not returned by the service: {}",
            missing.join(", ")
        ));
    }

    let mut written = Vec::new();
    for (_, paths, bytes) in decoded {
        for path in paths {
            fs::write(path, &bytes).with_context(|| format!("cannot write {}", path.display()))?;
            info!("wrote {}", path.display());
            written.push(path.clone());
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::SubtitleCandidate;
    use flate2::write::{DeflateEncoder, GzEncoder};
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    fn encode(text: &[u8]) -> String {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(text).unwrap();
        STANDARD.encode(gz.finish().unwrap())
    }

    fn choice(rank: usize) -> Choice {
        Choice {
            candidate: SubtitleCandidate {
                file_name: Some("Show.S02E01.srt".into()),
                language_id: Some("eng".into()),
                encoding: Some("UTF-8".into()),
                season: Some("2".into()),
                episode: Some("1".into()),
                subtitle_file_id: Some("1954734567".into()),
                ..Default::default()
            },
            rank,
        }
    }

    #[test]
    fn decodes_base64_gzip() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\nHola\n\n".as_bytes();
        assert_eq!(decode_payload(&encode(text)).unwrap(), text);
    }

    #[test]
    fn tolerates_wrapped_base64() {
        let encoded = encode(b"wrapped payload");
        let (a, b) = encoded.split_at(10);
        let wrapped = format!("{a}\n{b}\n");
        assert_eq!(decode_payload(&wrapped).unwrap(), b"wrapped payload");
    }

    #[test]
    fn rejects_raw_deflate() {
        let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
        deflate.write_all(b"not gzip framed").unwrap();
        let encoded = STANDARD.encode(deflate.finish().unwrap());
        assert!(decode_payload(&encoded).is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_payload("***not base64***").is_err());
    }

    #[test]
    fn names_file_from_choice() {
        let path = destination_path(Path::new("/videos"), &choice(3));
        assert_eq!(
            path,
            PathBuf::from("/videos/S2E1_3_eng_Show.S02E01.srt_UTF-8_ID-1954734567.srt")
        );
    }

    #[test]
    fn names_absent_fields() {
        let mut c = choice(1);
        c.candidate.season = None;
        c.candidate.episode = None;
        let path = destination_path(Path::new("dir"), &c);
        assert_eq!(
            path,
            Path::new("dir").join("SNoneENone_1_eng_Show.S02E01.srt_UTF-8_ID-1954734567.srt")
        );
    }

    #[test]
    fn path_cannot_change_id() {
        let mut request = DownloadRequest::new();
        request.queue("1", PathBuf::from("a.srt")).unwrap();
        request.queue("1", PathBuf::from("a.srt")).unwrap();
        assert!(request.queue("2", PathBuf::from("a.srt")).is_err());
        request.queue("1", PathBuf::from("b.srt")).unwrap();
        assert_eq!(request.ids(), vec!["1".to_string()]);
        assert_eq!(
            request.paths("1").unwrap(),
            &[PathBuf::from("a.srt"), PathBuf::from("b.srt")]
        );
    }

    #[test]
    fn writes_and_overwrites() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ep1.srt");
        fs::write(&target, "stale").unwrap();
        let mut request = DownloadRequest::new();
        request.queue("7", target.clone()).unwrap();
        let written = persist(
            &request,
            vec![EncodedSubtitle {
                file_id: "7".into(),
                data: encode(b"fresh"),
            }],
        )
        .unwrap();
        assert_eq!(written, vec![target.clone()]);
        assert_eq!(fs::read_to_string(&target).unwrap(), "fresh");
    }

    #[test]
    fn bad_payload_writes_nothing() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.srt");
        let bad = dir.path().join("bad.srt");
        let mut request = DownloadRequest::new();
        request.queue("1", good.clone()).unwrap();
        request.queue("2", bad.clone()).unwrap();
        let result = persist(
            &request,
            vec![
                EncodedSubtitle {
                    file_id: "1".into(),
                    data: encode(b"ok"),
                },
                EncodedSubtitle {
                    file_id: "2".into(),
                    data: STANDARD.encode(b"plain text"),
                },
            ],
        );
        assert!(result.is_err());
        assert!(!good.exists());
        assert!(!bad.exists());
    }

    #[test]
    fn missing_ids_write_nothing() {
        let dir = tempdir().unwrap();
        let returned = dir.path().join("returned.srt");
        let mut request = DownloadRequest::new();
        request.queue("1", returned.clone()).unwrap();
        request.queue("2", dir.path().join("missing.srt")).unwrap();
        let err = persist(
            &request,
            vec![EncodedSubtitle {
                file_id: "1".into(),
                data: encode(b"ok"),
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains('2'));
        assert!(!returned.exists());
    }

    #[test]
    fn ignores_unrequested_ids() {
        let dir = tempdir().unwrap();
        let request = DownloadRequest::new();
        let written = persist(
            &request,
            vec![EncodedSubtitle {
                file_id: "99".into(),
                data: "garbage".into(),
            }],
        )
        .unwrap();
        assert!(written.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
