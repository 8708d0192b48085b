use serde::{Deserialize, Serialize};
use url::Url;

/// Playback URLs for the three adaptive streaming protocols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackUris {
    pub smooth_streaming: Url,
    pub hls: Url,
    pub mpeg_dash: Url,
}

impl PlaybackUris {
    /// Protocol label and URL pairs, in display order
    pub fn entries(&self) -> [(&'static str, &Url); 3] {
        [
            ("Smooth Streaming", &self.smooth_streaming),
            ("HLS", &self.hls),
            ("MPEG DASH", &self.mpeg_dash),
        ]
    }
}
