// crates/clipcast-media/src/params.rs
//
// Turns an AMCP-style token list into a `ProducerParams`. Grounded in
// the donor's own token-parsing idiom (space-split, case-insensitive
// verb matching) generalized from a fixed option set to the producer's
// kind/resource/loop/seek/length/filter grammar.

use clipcast_core::error::{ProducerError, Result};
use clipcast_core::types::{ProducerParams, ResourceKind};

const FILE_EXTENSIONS: &[&str] = &[
    "m2t", "mov", "mp4", "dv", "flv", "mpg", "wav", "mp3", "dnxhd", "h264", "prores", "mkv", "avi",
    "ts", "m4v",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga", "tiff", "gif"];

/// Parse a producer's construction-time token list (e.g. from an AMCP
/// `LOADBG`/`PLAY` command) into a `ProducerParams`.
///
/// Grammar: `[<KIND>] <resource> [LOOP] [SEEK <n>] [LENGTH <n>] [FILTER <expr>] [-- <raw ffmpeg opts>]`.
pub fn parse(tokens: &[&str]) -> Result<ProducerParams> {
    if tokens.is_empty() {
        return Err(ProducerError::InvalidArgument { detail: "empty token list".into() });
    }

    let mut idx = 0;
    let kind = match tokens[idx].to_ascii_uppercase().as_str() {
        "FILE" => {
            idx += 1;
            Some(ResourceKind::File)
        }
        "DEVICE" => {
            idx += 1;
            Some(ResourceKind::Device)
        }
        "STREAM" => {
            idx += 1;
            Some(ResourceKind::Stream)
        }
        _ => None,
    };

    let resource = tokens
        .get(idx)
        .ok_or_else(|| ProducerError::InvalidArgument { detail: "missing resource token".into() })?
        .to_string();
    idx += 1;

    if has_image_extension(&resource) {
        return Err(ProducerError::InvalidArgument {
            detail: format!("image resources are not a valid producer source: {resource}"),
        });
    }

    let kind = kind.unwrap_or_else(|| infer_kind(&resource));

    let mut params = ProducerParams { kind, resource, ..ProducerParams::default() };

    while idx < tokens.len() {
        let verb = tokens[idx].to_ascii_uppercase();
        match verb.as_str() {
            "LOOP" => {
                params.loop_producer = true;
                idx += 1;
            }
            "SEEK" => {
                idx += 1;
                params.start = next_u32(tokens, idx, "SEEK")?;
                idx += 1;
            }
            "LENGTH" => {
                idx += 1;
                params.length = Some(next_u32(tokens, idx, "LENGTH")?);
                idx += 1;
            }
            "FILTER" => {
                idx += 1;
                let expr = tokens.get(idx).ok_or_else(|| ProducerError::InvalidArgument {
                    detail: "FILTER requires an expression".into(),
                })?;
                params.filter = resolve_filter_alias(expr);
                params.force_deinterlace = expr.eq_ignore_ascii_case("DEINTERLACE")
                    || expr.eq_ignore_ascii_case("DEINTERLACE_BOB");
                idx += 1;
            }
            "--" => {
                // Remaining tokens are raw `-opt value` pairs passed straight
                // through to the demuxer; nothing here needs to interpret
                // them, just stop parsing our own grammar.
                break;
            }
            other => {
                return Err(ProducerError::InvalidArgument {
                    detail: format!("unrecognized producer token: {other}"),
                })
            }
        }
    }

    Ok(params)
}

fn next_u32(tokens: &[&str], idx: usize, verb: &str) -> Result<u32> {
    tokens
        .get(idx)
        .ok_or_else(|| ProducerError::InvalidArgument { detail: format!("{verb} requires a number") })?
        .parse()
        .map_err(|_| ProducerError::InvalidArgument { detail: format!("{verb} value is not a number") })
}

/// `DEINTERLACE_BOB` and `DEINTERLACE` are shorthand for the YADIF filter
/// chain the muxer appends automatically once it picks a deinterlacing
/// display mode — spelling them out here lets a caller force the filter
/// string even before the muxer has seen a single frame.
fn resolve_filter_alias(expr: &str) -> String {
    match expr.to_ascii_uppercase().as_str() {
        "DEINTERLACE_BOB" => "YADIF=1:-1".to_string(),
        "DEINTERLACE" => "YADIF=0:-1".to_string(),
        _ => expr.to_string(),
    }
}

fn infer_kind(resource: &str) -> ResourceKind {
    if resource.starts_with("dshow://") {
        ResourceKind::Device
    } else if resource.starts_with("http://")
        || resource.starts_with("https://")
        || resource.starts_with("rtp://")
        || resource.starts_with("rtps://")
        || resource.starts_with("rtmp://")
    {
        ResourceKind::Stream
    } else {
        ResourceKind::File
    }
}

fn has_image_extension(resource: &str) -> bool {
    resource
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Probe `${media_folder}/<resource>` against the known producer
/// extension list when `resource` has none of its own. Returns the first
/// candidate path that exists on disk, or the bare joined path if none do
/// (lets `Input::open` surface the real I/O error).
pub fn resolve_file_path(media_folder: &std::path::Path, resource: &str) -> std::path::PathBuf {
    let joined = media_folder.join(resource);
    if joined.extension().is_some() || joined.exists() {
        return joined;
    }
    for ext in FILE_EXTENSIONS {
        let candidate = media_folder.join(format!("{resource}.{ext}"));
        if candidate.exists() {
            return candidate;
        }
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_resource_defaults_to_file() {
        let p = parse(&["clip.mp4"]).unwrap();
        assert_eq!(p.kind, ResourceKind::File);
        assert_eq!(p.resource, "clip.mp4");
    }

    #[test]
    fn explicit_kind_is_honored() {
        let p = parse(&["STREAM", "rtp://239.0.0.1:5000"]).unwrap();
        assert_eq!(p.kind, ResourceKind::Stream);
    }

    #[test]
    fn dshow_resource_infers_device() {
        let p = parse(&["dshow://video=Elgato"]).unwrap();
        assert_eq!(p.kind, ResourceKind::Device);
    }

    #[test]
    fn http_resource_infers_stream() {
        let p = parse(&["http://example.com/feed.ts"]).unwrap();
        assert_eq!(p.kind, ResourceKind::Stream);
    }

    #[test]
    fn loop_seek_length_filter_tokens_apply() {
        let p = parse(&["clip.mp4", "LOOP", "SEEK", "100", "LENGTH", "500", "FILTER", "DEINTERLACE_BOB"])
            .unwrap();
        assert!(p.loop_producer);
        assert_eq!(p.start, 100);
        assert_eq!(p.length, Some(500));
        assert_eq!(p.filter, "YADIF=1:-1");
        assert!(p.force_deinterlace);
    }

    #[test]
    fn deinterlace_alias_maps_to_yadif_progressive() {
        let p = parse(&["clip.mp4", "FILTER", "DEINTERLACE"]).unwrap();
        assert_eq!(p.filter, "YADIF=0:-1");
    }

    #[test]
    fn raw_ffmpeg_opts_stop_grammar_parsing() {
        let p = parse(&["clip.mp4", "LOOP", "--", "-vsync", "0"]).unwrap();
        assert!(p.loop_producer);
    }

    #[test]
    fn image_resource_is_rejected() {
        assert!(parse(&["thumbnail.png"]).is_err());
    }

    #[test]
    fn missing_resource_is_an_error() {
        assert!(parse(&["FILE"]).is_err());
    }

    #[test]
    fn unrecognized_token_is_an_error() {
        assert!(parse(&["clip.mp4", "BOGUS"]).is_err());
    }
}
