//! Tolerant extraction of album metadata and per-track play counts from a
//! `getAlbum` response.
//!
//! The response shape is undocumented and drifts, so every field is read through
//! `serde_json::Value` lookups. Album-level problems fail the whole response;
//! track-level problems only skip that track.

use crate::data::models::{AlbumMetadata, HarvestedAlbum, MetricSample};
use crate::partner::errors::PartnerApiError;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Parse a full response body into a [`HarvestedAlbum`].
pub fn parse_album_response(
    album_id: &str,
    body: &Value,
    observed_at: DateTime<Utc>,
) -> Result<HarvestedAlbum, PartnerApiError> {
    let album = &body["data"]["albumUnion"];
    if !album.is_object() {
        let reason = body["errors"][0]["message"]
            .as_str()
            .map(|m| format!("missing data.albumUnion ({m})"))
            .unwrap_or_else(|| "missing data.albumUnion".to_string());
        return Err(PartnerApiError::malformed(reason));
    }

    let album_name = album["name"]
        .as_str()
        .ok_or_else(|| PartnerApiError::malformed("album has no name"))?
        .to_string();

    let items = album["tracksV2"]["items"]
        .as_array()
        .ok_or_else(|| PartnerApiError::malformed("missing tracksV2.items"))?;

    let (artist_name, artist_id) = extract_artist(album, &album_name);
    let cover_art = largest_cover(album);
    let release_date = album["date"]["isoString"]
        .as_str()
        .and_then(|raw| {
            let parsed = parse_release_date(raw);
            if parsed.is_none() {
                warn!(album_id, raw, "Unparseable release date");
            }
            parsed
        });

    let mut samples = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match parse_track(&item["track"]) {
            Ok(track) => samples.push(MetricSample {
                track_id: track.track_id,
                album_id: album_id.to_string(),
                track_name: track.name,
                artist_name: track.artist_name.unwrap_or_else(|| artist_name.clone()),
                play_count: track.play_count,
                observed_at,
            }),
            Err(reason) => {
                warn!(album_id, index, reason = %reason, "Skipping malformed track entry");
            }
        }
    }

    debug!(
        album_id,
        tracks = items.len(),
        parsed = samples.len(),
        "Parsed album response"
    );

    Ok(HarvestedAlbum {
        album_id: album_id.to_string(),
        metadata: AlbumMetadata {
            album_name,
            artist_name,
            artist_id,
            cover_art,
            release_date,
        },
        samples,
    })
}

struct TrackEntry {
    track_id: String,
    name: String,
    play_count: i64,
    artist_name: Option<String>,
}

fn parse_track(track: &Value) -> Result<TrackEntry, String> {
    if !track.is_object() {
        return Err("entry has no track object".to_string());
    }

    let uri = track["uri"].as_str().ok_or("track has no uri")?;
    let track_id = uri_id(uri).ok_or_else(|| format!("unusable track uri '{uri}'"))?;
    let name = track["name"].as_str().ok_or("track has no name")?.to_string();
    let play_count = parse_play_count(&track["playcount"])?;

    Ok(TrackEntry {
        track_id,
        name,
        play_count,
        artist_name: first_artist(&track["artists"]).map(|(name, _)| name),
    })
}

/// Play counts arrive as decimal strings, occasionally as numbers. Absent means zero.
fn parse_play_count(value: &Value) -> Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .filter(|n| *n >= 0)
            .ok_or_else(|| format!("invalid playcount {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or_else(|| format!("invalid playcount '{s}'")),
        other => Err(format!("invalid playcount {other}")),
    }
}

/// Last `:`-separated segment of a `spotify:<kind>:<id>` uri.
fn uri_id(uri: &str) -> Option<String> {
    let id = uri.rsplit(':').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// `(name, id)` of the first artist in an `{items: [{uri, profile: {name}}]}` list.
fn first_artist(artists: &Value) -> Option<(String, Option<String>)> {
    let first = artists["items"].as_array()?.first()?;
    let name = first["profile"]["name"].as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let id = first["uri"].as_str().and_then(uri_id);
    Some((name.to_string(), id))
}

/// Album artists, then the first track's artists, then the "Artist - Album" title prefix.
fn extract_artist(album: &Value, album_name: &str) -> (String, Option<String>) {
    if let Some(found) = first_artist(&album["artists"]) {
        return found;
    }
    if let Some(found) = first_artist(&album["tracksV2"]["items"][0]["track"]["artists"]) {
        debug!(artist = %found.0, "Artist taken from first track");
        return found;
    }
    let fallback = album_name
        .split(" - ")
        .next()
        .unwrap_or(album_name)
        .trim()
        .to_string();
    debug!(artist = %fallback, "Artist taken from album title");
    (fallback, None)
}

/// URL of the cover image source with the largest `width * height`.
fn largest_cover(album: &Value) -> Option<String> {
    album["coverArt"]["sources"]
        .as_array()?
        .iter()
        .filter_map(|source| {
            let url = source["url"].as_str()?;
            let width = source["width"].as_u64().unwrap_or(0);
            let height = source["height"].as_u64().unwrap_or(0);
            Some((width.saturating_mul(height), url))
        })
        .max_by_key(|(area, _)| *area)
        .map(|(_, url)| url.to_string())
}

/// Accepts `YYYY`, `YYYY-MM` and `YYYY-MM-DD` (missing parts default to `01`), as well
/// as full ISO timestamps, which are truncated to their date.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date = if raw.len() > 10 { raw.get(..10)? } else { raw };
    let normalized = match date.len() {
        4 => format!("{date}-01-01"),
        7 => format!("{date}-01"),
        10 => date.to_string(),
        _ => return None,
    };
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").ok()
}
