//! Query-string parsing and source resolution.

use url::Url;

use super::error::{PolicyError, ValidationError};
use crate::config::ImageConfig;
use crate::http::Request;
use crate::transform::{OutputFormat, TransformParams};

/// Resolves `src` against the request's origin.
///
/// Relative values are joined onto `http://<Host>/`, or onto
/// `config.base_url` when the request carries no usable `Host` header.
pub fn resolve_source(request: &Request, config: &ImageConfig) -> Result<Url, ValidationError> {
    let raw = request
        .query_param("src")
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingSource)?;

    let base = request
        .headers()
        .get("host")
        .and_then(|host| Url::parse(&format!("http://{host}/")).ok())
        .or_else(|| config.base().ok());

    let resolved = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| ValidationError::InvalidSource(format!("{raw}: {e}")))?;

    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidSource(format!(
            "{raw}: unsupported scheme '{}'",
            resolved.scheme()
        )));
    }
    if resolved.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::InvalidSource(format!("{raw}: missing host")));
    }

    Ok(resolved)
}

/// Rejects sources whose host is not in `allowed_domains`.
pub fn check_domain(src: &Url, config: &ImageConfig) -> Result<(), PolicyError> {
    let host = src.host_str().unwrap_or_default();
    if config.is_allowed_host(host) {
        Ok(())
    } else {
        Err(PolicyError::DomainNotAllowed(host.to_owned()))
    }
}

/// Parses `w`, `h`, `q`, and `f`, in that order. The first failure wins.
pub fn parse_params(request: &Request) -> Result<TransformParams, ValidationError> {
    let width = positive_int(request, "w")?;
    let height = positive_int(request, "h")?;
    let quality = positive_int(request, "q")?;
    let format = match request.query_param("f") {
        None | Some("") => OutputFormat::Auto,
        Some(raw) => raw.parse()?,
    };

    Ok(TransformParams {
        width,
        height,
        quality,
        format,
    })
}

/// Absent is `None`; present must be a base-10 integer greater than zero.
fn positive_int(request: &Request, name: &'static str) -> Result<Option<u32>, ValidationError> {
    let Some(raw) = request.query_param(name) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ValidationError::InvalidParameter {
            name,
            value: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str, host: Option<&str>) -> Request {
        let host = host.map(|h| format!("Host: {h}\r\n")).unwrap_or_default();
        let raw = format!("GET {target} HTTP/1.1\r\n{host}\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn missing_or_empty_src() {
        let config = ImageConfig::default();
        for target in ["/optimized-image", "/optimized-image?src=", "/optimized-image?w=10"] {
            assert!(matches!(
                resolve_source(&request(target, Some("localhost")), &config),
                Err(ValidationError::MissingSource)
            ));
        }
    }

    #[test]
    fn relative_src_resolves_against_host_header() {
        let config = ImageConfig::default();
        let req = request("/optimized-image?src=%2Fimg%2Fcat.png", Some("example.com:8080"));
        let url = resolve_source(&req, &config).unwrap();
        assert_eq!(url.as_str(), "http://example.com:8080/img/cat.png");
    }

    #[test]
    fn relative_src_without_host_uses_base_url() {
        let config = ImageConfig {
            base_url: "https://cdn.example.com/assets/".into(),
            ..Default::default()
        };
        let req = request("/optimized-image?src=cat.png", None);
        let url = resolve_source(&req, &config).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/assets/cat.png");
    }

    #[test]
    fn absolute_src_ignores_base() {
        let config = ImageConfig::default();
        let req = request(
            "/optimized-image?src=https%3A%2F%2Fcdn.example.com%2Fa.png",
            Some("localhost"),
        );
        assert_eq!(
            resolve_source(&req, &config).unwrap().as_str(),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let config = ImageConfig::default();
        for src in ["file%3A%2F%2F%2Fetc%2Fpasswd", "data%3Aimage%2Fpng%3Bbase64%2CAAAA"] {
            let req = request(&format!("/optimized-image?src={src}"), Some("localhost"));
            assert!(matches!(
                resolve_source(&req, &config),
                Err(ValidationError::InvalidSource(_))
            ));
        }
    }

    #[test]
    fn domain_check_is_case_insensitive() {
        let config = ImageConfig::default();
        assert!(check_domain(&Url::parse("http://CDN.Example.com/a.png").unwrap(), &config).is_ok());
        let err = check_domain(&Url::parse("http://evil.com/a.png").unwrap(), &config).unwrap_err();
        assert_eq!(err.to_string(), "Domain 'evil.com' not allowed");
    }

    #[test]
    fn parses_all_params() {
        let req = request("/x?src=a.png&w=640&h=480&q=80&f=webp", None);
        assert_eq!(
            parse_params(&req).unwrap(),
            TransformParams {
                width: Some(640),
                height: Some(480),
                quality: Some(80),
                format: OutputFormat::Webp,
            }
        );
    }

    #[test]
    fn absent_and_empty_format_mean_auto() {
        assert_eq!(parse_params(&request("/x", None)).unwrap(), TransformParams::default());
        assert_eq!(parse_params(&request("/x?f=", None)).unwrap().format, OutputFormat::Auto);
    }

    #[test]
    fn rejects_non_positive_and_non_numeric() {
        for (query, name, value) in [
            ("w=abc", "w", "abc"),
            ("w=0", "w", "0"),
            ("h=-50", "h", "-50"),
            ("q=", "q", ""),
            ("w=1.5", "w", "1.5"),
        ] {
            match parse_params(&request(&format!("/x?{query}"), None)) {
                Err(ValidationError::InvalidParameter { name: n, value: v }) => {
                    assert_eq!((n, v.as_str()), (name, value));
                }
                other => panic!("{query}: expected InvalidParameter, got {other:?}"),
            }
        }
    }

    #[test]
    fn first_failure_wins() {
        let err = parse_params(&request("/x?f=gif&q=bad&w=bad", None)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { name: "w", .. }));

        let err = parse_params(&request("/x?f=gif&q=bad", None)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { name: "q", .. }));

        let err = parse_params(&request("/x?f=gif", None)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid query parameter: Invalid output format: gif");
    }
}
