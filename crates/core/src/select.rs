//! Candidate projection, ranking and selection.
//! Search results are reduced to the fields we care about, ordered by
//! popularity and the caller's preferred rank is picked from them.

use crate::service::RawRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

/// Rendering of a field the remote record did not carry.
pub const ABSENT: &str = "None";

/// Failures that stop a candidate from being chosen.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    /// The search returned nothing to choose from.
    #[error("no subtitles found")]
    NoCandidates,
    /// The popularity of a candidate could not be read as an integer.
    #[error("subtitle file {subtitle_file_id} has an invalid download count: {value}")]
    InvalidDownloadCount {
        subtitle_file_id: String,
        value: String,
    },
}

/// The part of a search result used for ranking and naming.
/// Every field is optional: `None` marks a field the record did not carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubtitleCandidate {
    #[serde(rename = "SubFileName")]
    pub file_name: Option<String>,
    #[serde(rename = "SubLanguageID")]
    pub language_id: Option<String>,
    #[serde(rename = "SubEncoding")]
    pub encoding: Option<String>,
    #[serde(rename = "SeriesSeason")]
    pub season: Option<String>,
    #[serde(rename = "SeriesEpisode")]
    pub episode: Option<String>,
    #[serde(rename = "SubDownloadsCnt")]
    pub download_count: Option<String>,
    #[serde(rename = "SubBad")]
    pub bad: Option<String>,
    #[serde(rename = "SubComments")]
    pub comments: Option<String>,
    #[serde(rename = "IDSubtitle")]
    pub subtitle_id: Option<String>,
    #[serde(rename = "IDSubtitleFile")]
    pub subtitle_file_id: Option<String>,
}

impl SubtitleCandidate {
    /// Project a raw search record onto the candidate fields.
    pub fn from_record(record: &RawRecord) -> Self {
        let field = |name: &str| record.get(name).cloned();
        Self {
            file_name: field("SubFileName"),
            language_id: field("SubLanguageID"),
            encoding: field("SubEncoding"),
            season: field("SeriesSeason"),
            episode: field("SeriesEpisode"),
            download_count: field("SubDownloadsCnt"),
            bad: field("SubBad"),
            comments: field("SubComments"),
            subtitle_id: field("IDSubtitle"),
            subtitle_file_id: field("IDSubtitleFile"),
        }
    }

    /// Parse the download count used as the ranking key.
    pub fn downloads(&self) -> Result<i64, SelectError> {
        self.download_count
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| SelectError::InvalidDownloadCount {
                subtitle_file_id: or_absent(&self.subtitle_file_id).to_string(),
                value: or_absent(&self.download_count).to_string(),
            })
    }
}

/// The candidate picked for a video together with the rank it was picked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub candidate: SubtitleCandidate,
    /// Effective 1-indexed rank, lower than the requested one when clamped.
    pub rank: usize,
}

/// Field value or the absent marker, for display and file names.
pub fn or_absent(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(ABSENT)
}

/// Sort candidates by download count, most downloaded first.
/// The sort is stable so equally popular candidates keep the order the
/// service returned them in.
pub fn rank(candidates: Vec<SubtitleCandidate>) -> Result<Vec<SubtitleCandidate>, SelectError> {
    let mut keyed = candidates
        .into_iter()
        .map(|c| c.downloads().map(|n| (n, c)))
        .collect::<Result<Vec<_>, SelectError>>()?;
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(keyed.into_iter().map(|(_, c)| c).collect())
}

/// Pick the candidate at 1-indexed `requested` rank after ranking.
/// Rank 0 and any rank past the end both fall back to the last candidate,
/// and the returned `Choice` reports the rank actually used.
pub fn choose(candidates: Vec<SubtitleCandidate>, requested: usize) -> Result<Choice, SelectError> {
    trace!("choose(candidates={}, requested={})", candidates.len(), requested);
    if candidates.is_empty() {
        return Err(SelectError::NoCandidates);
    }
    let mut ranked = rank(candidates)?;
    let rank = match requested {
        0 => ranked.len(),
        n => n.min(ranked.len()),
    };
    if rank != requested {
        debug!("requested rank {} clamped to {}", requested, rank);
    }
    let candidate = ranked.swap_remove(rank - 1);
    Ok(Choice { candidate, rank })
}
