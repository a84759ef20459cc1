//! Content sniffing.
//!
//! Precedence, strongest first:
//!
//! 1. A signature match. Among matches the more specific signature wins; on a
//!    tie, the format whose extension matches the file name wins; after that,
//!    registry order.
//! 2. Only when no signature matches: an extension hint, honored for formats
//!    without a reliable magic number (`tar`, `lzma`), or for any format when
//!    the content is empty.

use crate::registry::{FormatDescriptor, FormatRegistry};
use std::cmp::Reverse;

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 4096;

/// Why a candidate was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// Content matched a signature of this strength
    Signature(usize),
    /// Only the file name pointed at the format
    Extension,
}

/// A possible format for some content, with the reason it was proposed.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'r> {
    pub format: &'r FormatDescriptor,
    pub evidence: Evidence,
}

pub struct Sniffer<'r> {
    registry: &'r FormatRegistry,
}

impl<'r> Sniffer<'r> {
    pub fn new(registry: &'r FormatRegistry) -> Self {
        Self { registry }
    }

    /// Rank every format that could describe `prefix`, best first.
    ///
    /// `name` is the file name (or derived name of a decoded layer) and only
    /// matters for tie-breaks and fallback.
    pub fn sniff(&self, prefix: &[u8], name: &str) -> Vec<Candidate<'r>> {
        let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];
        let formats = self.registry.all_matchers();

        let mut matched: Vec<(usize, Candidate<'r>)> = formats
            .iter()
            .enumerate()
            .filter_map(|(order, format)| {
                format.match_strength(prefix).map(|strength| {
                    (
                        order,
                        Candidate {
                            format,
                            evidence: Evidence::Signature(strength),
                        },
                    )
                })
            })
            .collect();

        if !matched.is_empty() {
            matched.sort_by_key(|(order, c)| {
                let strength = match c.evidence {
                    Evidence::Signature(s) => s,
                    Evidence::Extension => 0,
                };
                let named = c.format.matching_extension(name).is_some();
                (Reverse(strength), !named, *order)
            });
            return matched.into_iter().map(|(_, c)| c).collect();
        }

        let mut hinted: Vec<(&'r FormatDescriptor, usize)> = formats
            .iter()
            .filter(|f| f.has_extension_fallback() || prefix.is_empty())
            .filter_map(|f| f.matching_extension(name).map(|hint| (f, hint.suffix.len())))
            .collect();
        // Longest suffix first.
        hinted.sort_by_key(|(_, len)| Reverse(*len));
        hinted
            .into_iter()
            .map(|(format, _)| Candidate {
                format,
                evidence: Evidence::Extension,
            })
            .collect()
    }

    /// The single best format for `prefix`, or `None` when unrecognized.
    pub fn best(&self, prefix: &[u8], name: &str) -> Option<&'r FormatDescriptor> {
        self.sniff(prefix, name).first().map(|c| c.format)
    }
}
