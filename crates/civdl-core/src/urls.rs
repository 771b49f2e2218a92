use crate::error::{CoreError, CoreResult};

/// Parse a Civitai model URL into `(model_id, Option<version_id>)`.
///
/// Accepted shapes:
/// - `https://civitai.com/models/649516`
/// - `https://civitai.com/models/649516?modelVersionId=726676`
/// - `https://civitai.com/models/649516/some-slug?modelVersionId=726676`
///
/// The version id is optional; its absence means "resolve the latest
/// version". A URL with no extractable numeric model id is rejected.
pub fn parse_model_url(url: &str) -> CoreResult<(u64, Option<u64>)> {
    let trimmed = url.split('#').next().unwrap_or(url);
    let (path, query) = match trimmed.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (trimmed, None),
    };

    let model_id = extract_model_id(path)
        .ok_or_else(|| CoreError::InvalidUrl(url.to_string()))?;

    let version_id = query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key == "modelVersionId" {
                value.parse::<u64>().ok()
            } else {
                None
            }
        })
    });

    Ok((model_id, version_id))
}

/// Pull the numeric id out of a `/models/{id}[/slug]` path.
fn extract_model_id(path: &str) -> Option<u64> {
    let rest = path.split_once("/models/")?.1;
    let digits: &str = rest
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|s| !s.is_empty())?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_model_url() {
        let (id, ver) = parse_model_url("https://civitai.com/models/649516").unwrap();
        assert_eq!(id, 649516);
        assert_eq!(ver, None);
    }

    #[test]
    fn model_url_with_version() {
        let (id, ver) =
            parse_model_url("https://civitai.com/models/649516?modelVersionId=726676").unwrap();
        assert_eq!(id, 649516);
        assert_eq!(ver, Some(726676));
    }

    #[test]
    fn model_url_with_slug_and_version() {
        let (id, ver) = parse_model_url(
            "https://civitai.com/models/649516/some-model-name?modelVersionId=726676",
        )
        .unwrap();
        assert_eq!(id, 649516);
        assert_eq!(ver, Some(726676));
    }

    #[test]
    fn extra_query_params_ignored() {
        let (id, ver) = parse_model_url(
            "https://civitai.com/models/12345?foo=bar&modelVersionId=99&baz=1",
        )
        .unwrap();
        assert_eq!(id, 12345);
        assert_eq!(ver, Some(99));
    }

    #[test]
    fn unparsable_version_is_none() {
        let (id, ver) =
            parse_model_url("https://civitai.com/models/42?modelVersionId=abc").unwrap();
        assert_eq!(id, 42);
        assert_eq!(ver, None);
    }

    #[test]
    fn missing_model_id_is_rejected() {
        assert!(matches!(
            parse_model_url("https://civitai.com/models/"),
            Err(CoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_model_url("https://civitai.com/images/123"),
            Err(CoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_model_url("not a url"),
            Err(CoreError::InvalidUrl(_))
        ));
    }
}
