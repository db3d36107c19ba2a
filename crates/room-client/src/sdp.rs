//! SDP diagnostics.
//!
//! The client relays session descriptions without interpreting them; the
//! single exception is pulling out the ssrc identifiers per media section
//! so connection logs can be correlated with RTP-level observations.

/// The ssrc identifiers announced by one `m=` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSsrc {
    /// Media type from the section line, e.g. `audio` or `video`.
    pub media: String,
    /// Distinct ssrcs in order of first appearance.
    pub ssrcs: Vec<u32>,
}

/// Enumerate `m=` sections and their `a=ssrc:` identifiers.
///
/// Lines that do not parse are skipped; this is for logging, not
/// validation.
#[must_use]
pub fn media_ssrcs(sdp: &str) -> Vec<MediaSsrc> {
    let mut sections: Vec<MediaSsrc> = Vec::new();
    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("m=") {
            let media = rest.split_whitespace().next().unwrap_or("").to_string();
            sections.push(MediaSsrc {
                media,
                ssrcs: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("a=ssrc:") {
            let Some(section) = sections.last_mut() else {
                // ssrc attribute before any media section; ignore.
                continue;
            };
            let Some(ssrc) = rest
                .split_whitespace()
                .next()
                .and_then(|value| value.parse::<u32>().ok())
            else {
                continue;
            };
            if !section.ssrcs.contains(&ssrc) {
                section.ssrcs.push(ssrc);
            }
        }
    }
    sections
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 0.0.0.0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=ssrc:1111 cname:aud\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=ssrc-group:FID 2222 3333\r\n\
        a=ssrc:2222 cname:vid\r\n\
        a=ssrc:2222 msid:stream track\r\n\
        a=ssrc:3333 cname:vid\r\n";

    #[test]
    fn test_sections_and_ssrcs_extracted_in_order() {
        let sections = media_ssrcs(SDP);
        assert_eq!(
            sections,
            vec![
                MediaSsrc {
                    media: "audio".to_string(),
                    ssrcs: vec![1111],
                },
                MediaSsrc {
                    media: "video".to_string(),
                    ssrcs: vec![2222, 3333],
                },
            ]
        );
    }

    #[test]
    fn test_repeated_ssrc_attributes_dedupe() {
        let sections = media_ssrcs(SDP);
        assert_eq!(sections.get(1).unwrap().ssrcs, vec![2222, 3333]);
    }

    #[test]
    fn test_sdp_without_media_sections() {
        assert!(media_ssrcs("v=0\r\ns=-\r\n").is_empty());
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let sections = media_ssrcs("m=video 9 X\na=ssrc:notanumber cname:x\na=ssrc:77 cname:x\n");
        assert_eq!(sections.first().unwrap().ssrcs, vec![77]);
    }
}
