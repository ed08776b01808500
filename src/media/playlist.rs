//! HLS playlist reading: just enough to learn how much media exists and
//! whether the playlist is complete.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("unreadable playlist: {0}")]
pub struct PlaylistError(String);

/// Timing view of a media playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaPlaylist {
    pub segment_durations: Vec<f64>,
    /// `#EXT-X-ENDLIST` seen: no more segments will be appended.
    pub ended: bool,
}

impl MediaPlaylist {
    pub fn total_duration(&self) -> f64 {
        self.segment_durations.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

impl From<m3u8_rs::MediaPlaylist> for MediaPlaylist {
    fn from(playlist: m3u8_rs::MediaPlaylist) -> Self {
        Self {
            segment_durations: playlist
                .segments
                .iter()
                .map(|segment| segment.duration as f64)
                .filter(|duration| duration.is_finite() && *duration >= 0.0)
                .collect(),
            ended: playlist.end_list,
        }
    }
}

pub fn parse_playlist(content: &[u8]) -> Result<Playlist, PlaylistError> {
    match m3u8_rs::parse_playlist(content) {
        Ok((_, m3u8_rs::Playlist::MasterPlaylist(master))) => Ok(Playlist::Master(
            master
                .variants
                .into_iter()
                .filter(|variant| !variant.is_i_frame)
                .map(|variant| Variant {
                    bandwidth: variant.bandwidth,
                    uri: variant.uri,
                })
                .collect(),
        )),
        Ok((_, m3u8_rs::Playlist::MediaPlaylist(media))) => Ok(Playlist::Media(media.into())),
        Err(err) => Err(PlaylistError(err.to_string())),
    }
}
