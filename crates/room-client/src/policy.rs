//! Simulcast layer selection.
//!
//! When a subscription needs a single layer out of a simulcast set, the
//! pick is a policy choice, not a protocol rule. Layers without an
//! assigned ssrc are not yet live on the wire and are never selected.

use signal_proto::types::VideoLayer;

/// How to pick one layer from a simulcast set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerSelection {
    /// Smallest resolution, lowest bitrate as tie-break.
    #[default]
    LowestBandwidth,
    /// Largest resolution, highest bitrate as tie-break.
    HighestResolution,
}

/// Pick a layer according to `policy`. `None` when no layer has a live
/// ssrc.
#[must_use]
pub fn select_layer(policy: LayerSelection, layers: &[VideoLayer]) -> Option<&VideoLayer> {
    let live = layers.iter().filter(|layer| layer.ssrc != 0);
    match policy {
        LayerSelection::LowestBandwidth => {
            live.min_by_key(|layer| (u64::from(layer.width) * u64::from(layer.height), layer.bitrate))
        }
        LayerSelection::HighestResolution => {
            live.max_by_key(|layer| (u64::from(layer.width) * u64::from(layer.height), layer.bitrate))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signal_proto::types::VideoQuality;

    fn layer(quality: VideoQuality, width: u32, height: u32, bitrate: u32, ssrc: u32) -> VideoLayer {
        VideoLayer {
            quality,
            width,
            height,
            bitrate,
            ssrc,
        }
    }

    fn simulcast() -> Vec<VideoLayer> {
        vec![
            layer(VideoQuality::High, 1280, 720, 1_500_000, 101),
            layer(VideoQuality::Medium, 640, 360, 500_000, 102),
            layer(VideoQuality::Low, 320, 180, 150_000, 103),
        ]
    }

    #[test]
    fn test_lowest_bandwidth_picks_smallest_live_layer() {
        let layers = simulcast();
        let picked = select_layer(LayerSelection::LowestBandwidth, &layers).unwrap();
        assert_eq!(picked.ssrc, 103);
    }

    #[test]
    fn test_highest_resolution_picks_largest_live_layer() {
        let layers = simulcast();
        let picked = select_layer(LayerSelection::HighestResolution, &layers).unwrap();
        assert_eq!(picked.ssrc, 101);
    }

    #[test]
    fn test_layers_without_ssrc_are_skipped() {
        let layers = vec![
            layer(VideoQuality::Low, 320, 180, 150_000, 0),
            layer(VideoQuality::Medium, 640, 360, 500_000, 102),
        ];
        let picked = select_layer(LayerSelection::LowestBandwidth, &layers).unwrap();
        assert_eq!(picked.ssrc, 102);
    }

    #[test]
    fn test_no_live_layer_yields_none() {
        let layers = vec![layer(VideoQuality::High, 1280, 720, 1_500_000, 0)];
        assert!(select_layer(LayerSelection::LowestBandwidth, &layers).is_none());
    }

    #[test]
    fn test_bitrate_breaks_resolution_ties() {
        let layers = vec![
            layer(VideoQuality::Medium, 640, 360, 700_000, 201),
            layer(VideoQuality::Medium, 640, 360, 400_000, 202),
        ];
        let picked = select_layer(LayerSelection::LowestBandwidth, &layers).unwrap();
        assert_eq!(picked.ssrc, 202);
    }
}
