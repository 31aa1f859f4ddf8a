//! Cluster Nodes List writer.
//!
//! One line per cluster, optionally prefixed with the cluster id and
//! suffixed with per-node shares. The header carries the cluster count; when
//! the count is unknown until the body is written, a fixed-width placeholder
//! is reserved and overwritten afterwards (seek + rewrite).

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};

use crate::error::{Result, StrataError};
use crate::hierarchy::Hierarchy;
use crate::numeric::equal_n;

/// Body format of a cluster-list file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ClusterListStyle {
    /// Nodes only, no header.
    Pure,
    /// Nodes only, with header.
    Simple,
    /// Nodes with a `:share` suffix where shares are unequal.
    Shared,
    /// `<cluster_id>> ` prefix and shares.
    #[default]
    Extended,
}

impl ClusterListStyle {
    /// Whether unequal shares are written.
    #[must_use]
    pub fn shares(self) -> bool {
        matches!(self, Self::Shared | Self::Extended)
    }

    /// Whether lines carry the cluster id.
    #[must_use]
    pub fn numbered(self) -> bool {
        self == Self::Extended
    }
}

/// Mask of node ids suppressed under the member filter.
const FILTER_MASK: u32 = 1 << 31;

/// Width of the backpatched cluster-count field: the digits of `u32::MAX`
/// plus the value cut and the trailing comma.
const CLUSTERS_FIELD: usize = 11;

/// Formats a value the way `%G` does: up to six significant digits, no
/// trailing zeros.
pub(crate) fn format_g(v: f64) -> String {
    if v == 0.0 {
        return "0".to_owned();
    }
    let formatted = format!("{v:.*}", precision_for(v));
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_owned()
}

fn precision_for(v: f64) -> usize {
    let magnitude = v.abs().log10().floor() as i32;
    (5 - magnitude).max(0) as usize
}

/// Streaming CNL writer over any seekable sink.
pub struct CnlWriter<W: Write + Seek> {
    out: W,
    style: ClusterListStyle,
    filter_members: bool,
    clusters_pos: Option<u64>,
    written: u32,
}

impl<W: Write + Seek> CnlWriter<W> {
    /// Creates a writer over `out`.
    #[must_use]
    pub fn new(out: W, style: ClusterListStyle, filter_members: bool) -> Self {
        Self {
            out,
            style,
            filter_members,
            clusters_pos: None,
            written: 0,
        }
    }

    /// Writes the header. `clusters = None` reserves a placeholder to be
    /// backpatched by [`Self::finish`]; `Pure` files have no header.
    ///
    /// # Errors
    /// Returns [`StrataError::Io`] on write failure.
    pub fn begin(&mut self, nodes: u32, clusters: Option<u32>) -> Result<()> {
        if self.style == ClusterListStyle::Pure {
            return Ok(());
        }
        self.write_str("# Clusters: ")?;
        match clusters {
            Some(n) => self.write_str(&format!("{n},"))?,
            None => {
                self.clusters_pos = Some(self.stream_pos()?);
                self.write_str(&" ".repeat(CLUSTERS_FIELD))?;
            }
        }
        self.write_str(&format!(
            "  Nodes: {nodes}, Fuzzy: {}, Numbered: {}\n",
            u8::from(self.style.shares()),
            u8::from(self.style.numbered()),
        ))
    }

    /// Writes one cluster line from an unwrapped member map keyed by node
    /// index. Shares are emitted only when they differ from the equal split
    /// across the node's owners.
    ///
    /// # Errors
    /// Returns [`StrataError::Io`] on write failure.
    pub fn cluster(
        &mut self,
        hier: &Hierarchy,
        cluster_id: u32,
        members: &BTreeMap<u32, f64>,
    ) -> Result<()> {
        let mut line = String::new();
        if self.style.numbered() {
            line.push_str(&format!("{cluster_id}> "));
        }
        let mut any = false;
        for (&node_ix, &share) in members {
            let node = &hier.nodes()[node_ix as usize];
            if self.filter_members && node.id() & FILTER_MASK != 0 {
                continue;
            }
            any = true;
            let owners = node.owners().len().max(1);
            let even = 1.0 / owners as f64;
            if self.style.shares() && !equal_n(share, even, owners) {
                line.push_str(&format!("{}:{} ", node.id(), format_g(share)));
            } else {
                line.push_str(&format!("{} ", node.id()));
            }
        }
        if !any {
            return Ok(());
        }
        line.pop();
        line.push('\n');
        self.written += 1;
        self.write_str(&line)
    }

    /// Backpatches the reserved cluster count and returns the sink.
    ///
    /// # Errors
    /// Returns [`StrataError::Io`] on seek or write failure.
    pub fn finish(mut self) -> Result<W> {
        if let Some(pos) = self.clusters_pos {
            self.out
                .seek(SeekFrom::Start(pos))
                .map_err(Self::io_err)?;
            self.write_str(&format!("{},", self.written))?;
            self.out.seek(SeekFrom::End(0)).map_err(Self::io_err)?;
        }
        self.out.flush().map_err(Self::io_err)?;
        Ok(self.out)
    }

    fn stream_pos(&mut self) -> Result<u64> {
        self.out.stream_position().map_err(Self::io_err)
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.out.write_all(s.as_bytes()).map_err(Self::io_err)
    }

    fn io_err(source: std::io::Error) -> StrataError {
        StrataError::Io {
            path: "<cluster list>".into(),
            source,
        }
    }
}
