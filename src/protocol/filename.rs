// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message file name codec.
//!
//! Requests and responses are named `{NNNN}.{role}.{kind}.{slug}.md`. This
//! module is the only place that knows the pattern; producers and consumers
//! both go through [`MessageFileName`].

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProtocolError;
use crate::workspace::Role;

/// Maximum slug length in characters.
pub const MAX_SLUG_LEN: usize = 50;

static FILE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4,})\.([a-z][a-z-]*)\.(request|response)\.([a-z0-9][a-z0-9-]*)\.md$")
        .expect("static regex is valid")
});

/// Whether a message file asks for work or answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// A decoded message file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageFileName {
    pub number: u32,
    /// The role the message concerns (the recipient of a request, the
    /// author of a response).
    pub role: Role,
    pub kind: MessageKind,
    pub slug: String,
}

impl MessageFileName {
    pub fn request(number: u32, role: Role, title: &str) -> Self {
        Self {
            number,
            role,
            kind: MessageKind::Request,
            slug: slugify(title),
        }
    }

    /// Decode a bare file name.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        let caps = FILE_NAME_RE
            .captures(name)
            .ok_or_else(|| ProtocolError::InvalidFileName(name.to_string()))?;

        let number = caps[1]
            .parse::<u32>()
            .map_err(|_| ProtocolError::InvalidFileName(name.to_string()))?;
        let role = caps[2]
            .parse::<Role>()
            .map_err(|_| ProtocolError::InvalidFileName(name.to_string()))?;
        let kind = match &caps[3] {
            "request" => MessageKind::Request,
            _ => MessageKind::Response,
        };

        Ok(Self {
            number,
            role,
            kind,
            slug: caps[4].to_string(),
        })
    }

    /// Decode the file-name component of a path.
    pub fn from_path(path: &Path) -> Result<Self, ProtocolError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ProtocolError::InvalidFileName(path.display().to_string()))?;
        Self::parse(name)
    }

    /// The response paired with this request (same number, role and slug).
    pub fn response(&self) -> Self {
        Self {
            kind: MessageKind::Response,
            ..self.clone()
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Whether `other` answers this request.
    pub fn is_answered_by(&self, other: &Self) -> bool {
        self.is_request()
            && other.kind == MessageKind::Response
            && other.number == self.number
            && other.role == self.role
    }
}

impl fmt::Display for MessageFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}.{}.{}.{}.md",
            self.number,
            self.role,
            self.kind.as_str(),
            self.slug
        )
    }
}

/// Glob matching every message of one kind for one role.
pub fn glob_for(role: Role, kind: MessageKind) -> String {
    format!("*.{}.{}.*.md", role, kind.as_str())
}

/// Turn a human title into a file-name slug.
///
/// Lowercases, collapses runs of non-alphanumerics into `-`, trims, and caps
/// the length at [`MAX_SLUG_LEN`]. An empty result becomes `task`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}
