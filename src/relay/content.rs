// Content type and filename selection
// (c) 2024 Ross Younger

use crate::tunnel::{FileMetadata, RelayError};

use super::sniff::{extension_for, media_type_for, OCTET_STREAM};

/// A content type the sender asked for explicitly.
///
/// The token may be a media type (`image/png`, `text/csv; charset=utf-8`) or a bare
/// filename extension (`json`, `.tar`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    content_type: String,
    extension: Option<String>,
}

/// RFC 6838 `restricted-name`, used for both the type and the subtype
fn is_restricted_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphanumeric())
        && name.len() <= 127
        && bytes.all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
}

/// RFC 7230 `token`
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn trim_ows(s: &str) -> &str {
    s.trim_matches([' ', '\t'])
}

/// `type "/" subtype *( OWS ";" OWS token "=" token )`
fn is_media_type(token: &str) -> bool {
    let mut parts = token.split(';');
    let Some((kind, subtype)) = parts
        .next()
        .map(|essence| essence.trim_end_matches([' ', '\t']))
        .and_then(|essence| essence.split_once('/'))
    else {
        return false;
    };
    is_restricted_name(kind)
        && is_restricted_name(subtype)
        && parts.all(|param| {
            trim_ows(param)
                .split_once('=')
                .is_some_and(|(name, value)| is_token(name) && is_token(value))
        })
}

impl DeclaredType {
    /// Parses a sender-supplied token
    pub fn parse(token: &str) -> Result<Self, RelayError> {
        let token = token.trim();
        let invalid = || RelayError::InvalidContentType(token.to_string());
        if token.contains('/') {
            if !is_media_type(token) {
                return Err(invalid());
            }
            return Ok(Self {
                content_type: token.to_string(),
                extension: extension_for(token).map(str::to_string),
            });
        }
        let ext = token.trim_start_matches('.');
        if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        Ok(Self {
            content_type: media_type_for(ext).unwrap_or(OCTET_STREAM).to_string(),
            extension: Some(format!(".{}", ext.to_ascii_lowercase())),
        })
    }

    /// Media type accessor
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The metadata a receiver will see, for a given filename stem
    #[must_use]
    pub fn metadata(&self, stem: &str) -> FileMetadata {
        FileMetadata {
            content_type: self.content_type.clone(),
            file_name: format!("{stem}{}", self.extension.as_deref().unwrap_or_default()),
        }
    }
}

/// The metadata a receiver will see for a sniffed media type
#[must_use]
pub fn sniffed_metadata(media_type: &str, stem: &str) -> FileMetadata {
    FileMetadata {
        content_type: media_type.to_string(),
        file_name: format!("{stem}{}", extension_for(media_type).unwrap_or_default()),
    }
}

#[cfg(test)]
mod test {
    use super::{sniffed_metadata, DeclaredType};
    use crate::tunnel::RelayError;

    #[test]
    fn media_type_token() {
        let d = DeclaredType::parse("image/png").unwrap();
        let m = d.metadata("sshpipe");
        assert_eq!(m.content_type, "image/png");
        assert_eq!(m.file_name, "sshpipe.png");
    }

    #[test]
    fn media_type_with_params() {
        let d = DeclaredType::parse("text/csv; charset=utf-8").unwrap();
        let m = d.metadata("f");
        assert_eq!(m.content_type, "text/csv; charset=utf-8");
        assert_eq!(m.file_name, "f.csv");
    }

    #[test]
    fn media_type_grammar() {
        for t in [
            "application/vnd.ms-excel",
            "image/svg+xml",
            "text/plain;charset=us-ascii",
            "text/plain ; charset=utf-8; format=flowed",
        ] {
            assert_eq!(DeclaredType::parse(t).unwrap().content_type(), t);
        }
    }

    #[test]
    fn unknown_media_type_has_no_extension() {
        let m = DeclaredType::parse("application/x-whatever").unwrap().metadata("f");
        assert_eq!(m.content_type, "application/x-whatever");
        assert_eq!(m.file_name, "f");
    }

    #[test]
    fn extension_token() {
        let m = DeclaredType::parse("json").unwrap().metadata("sshpipe");
        assert_eq!(m.content_type, "application/json");
        assert_eq!(m.file_name, "sshpipe.json");

        let m = DeclaredType::parse(".TAR").unwrap().metadata("x");
        assert_eq!(m.content_type, "application/x-tar");
        assert_eq!(m.file_name, "x.tar");

        let m = DeclaredType::parse("blob42").unwrap().metadata("x");
        assert_eq!(m.content_type, "application/octet-stream");
        assert_eq!(m.file_name, "x.blob42");
    }

    #[test]
    fn rejects_unsafe_tokens() {
        for t in [
            "",
            "   ",
            "text/plain\r\nX-Evil: 1",
            "a\"b/c",
            "../etc",
            "x y",
            "image/png extra",
            "image/",
            "/png",
            "text/plain; charset",
            "text/plain; =utf-8",
            "text/plain;;",
            "a/b/c",
        ] {
            assert!(
                matches!(
                    DeclaredType::parse(t),
                    Err(RelayError::InvalidContentType(_))
                ),
                "{t:?} should be rejected"
            );
        }
    }

    #[test]
    fn sniffed() {
        let m = sniffed_metadata("text/plain; charset=utf-8", "sshpipe");
        assert_eq!(m.file_name, "sshpipe.txt");
        let m = sniffed_metadata("application/octet-stream", "sshpipe");
        assert_eq!(m.file_name, "sshpipe");
        assert_eq!(m.content_disposition(), "attachment; filename=sshpipe");
    }
}
