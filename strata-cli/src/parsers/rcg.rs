//! Readable Compact Graph parser.
//!
//! Sections are introduced by `/nodes <count> [<first_id>]`, `/edges`, and
//! `/arcs`; payload lines have the form `<src>> <dst1>[:<w1>] <dst2>[:<w2>]`.
//! An `/arcs` section makes the loaded links directed; self-links are edges
//! either way. A declared `/nodes` count preallocates the store and permits
//! ingestion-time reduction.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use tracing::debug;

use strata_core::{
    Graph, GraphOptions, InputLink, LinkErrors, NodeErrors, Result,
};

use super::{format_error, io_error, parse_member, ParseOptions};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Section {
    #[default]
    None,
    Edges,
    Arcs,
}

/// Parser for `.rcg` (former `.hig`) files.
#[derive(Debug)]
pub struct RcgParser {
    path: PathBuf,
    opts: ParseOptions,
}

impl RcgParser {
    /// Creates a parser for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, opts: ParseOptions) -> Self {
        Self {
            path: path.into(),
            opts,
        }
    }

    /// Reads the file and builds the graph.
    ///
    /// # Errors
    /// Returns an input-format error with file and line context for a
    /// malformed payload, a reference error for links to undeclared nodes
    /// (when the node set was declared), and I/O errors verbatim.
    pub fn build(&self) -> Result<Graph> {
        let file = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        let reader = BufReader::new(file);

        let mut graph: Option<Graph> = None;
        let mut declared = false;
        let mut section = Section::None;
        let mut nderrs = NodeErrors::new();
        let mut lnerrs = LinkErrors::new();
        let mut unlinked = NodeErrors::new();

        for (lineno, line) in reader.lines().enumerate() {
            let lineno = lineno as u64 + 1;
            let line = line.map_err(|e| io_error(&self.path, e))?;
            let body = line.trim();
            if body.is_empty() || body.starts_with('#') {
                continue;
            }
            if let Some(rest) = body.strip_prefix('/') {
                let lower = rest.to_ascii_lowercase();
                let mut tokens = lower.split_whitespace();
                match tokens.next() {
                    Some("edges") => section = Section::Edges,
                    Some("arcs") => section = Section::Arcs,
                    Some("nodes") => {
                        let count: u32 = tokens
                            .next()
                            .ok_or_else(|| {
                                format_error(&self.path, lineno, "/nodes requires a count")
                            })?
                            .parse()
                            .map_err(|_| {
                                format_error(&self.path, lineno, "invalid /nodes count")
                            })?;
                        let first: Option<u32> = match tokens.next() {
                            Some(tok) => Some(tok.parse().map_err(|_| {
                                format_error(&self.path, lineno, "invalid /nodes first id")
                            })?),
                            None => None,
                        };
                        if graph.is_some() {
                            return Err(format_error(
                                &self.path,
                                lineno,
                                "duplicate /nodes section",
                            ));
                        }
                        let mut g = self.graph_for(count)?;
                        if let Some(first) = first {
                            g.add_nodes(count, first, &mut nderrs);
                            declared = true;
                        }
                        graph = Some(g);
                    }
                    other => {
                        return Err(format_error(
                            &self.path,
                            lineno,
                            format!("unknown section `/{}`", other.unwrap_or_default()),
                        ))
                    }
                }
                continue;
            }

            if section == Section::None {
                return Err(format_error(
                    &self.path,
                    lineno,
                    "payload before any /edges or /arcs section",
                ));
            }
            if graph.is_none() {
                graph = Some(self.graph_for(0)?);
            }
            let g = graph.as_mut().expect("created above");
            self.parse_links(
                g,
                body,
                lineno,
                section == Section::Arcs,
                declared,
                &mut lnerrs,
                &mut unlinked,
            )?;
        }

        nderrs.show();
        lnerrs.show();
        unlinked.show();
        let graph = match graph {
            Some(g) => g,
            None => self.graph_for(0)?,
        };
        debug!(
            nodes = graph.nodes().len(),
            directed = graph.directed(),
            "rcg network loaded"
        );
        Ok(graph)
    }

    fn graph_for(&self, expected_nodes: u32) -> Result<Graph> {
        Graph::new(GraphOptions {
            expected_nodes,
            shuffle: self.opts.shuffle,
            sum_duplicates: self.opts.sum_duplicates,
            reduction: if expected_nodes > 0 {
                self.opts.reduction
            } else {
                strata_core::ReductionPolicy::None
            },
            weighted: true,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_links(
        &self,
        graph: &mut Graph,
        body: &str,
        lineno: u64,
        directed: bool,
        declared: bool,
        lnerrs: &mut LinkErrors,
        unlinked: &mut NodeErrors,
    ) -> Result<()> {
        let (src_str, rest) = body.split_once('>').ok_or_else(|| {
            format_error(&self.path, lineno, "expected `<src>> <dst> ...`")
        })?;
        let src: u32 = src_str.trim().parse().map_err(|_| {
            format_error(&self.path, lineno, format!("invalid source id `{src_str}`"))
        })?;

        let mut links = Vec::new();
        for token in rest.split_whitespace() {
            let (id, weight) = parse_member(token, &self.path, lineno)?;
            links.push(match weight {
                Some(w) => InputLink::weighted(id, w),
                None => InputLink::new(id),
            });
        }
        if links.is_empty() {
            unlinked.add(src);
            let mut ignored = NodeErrors::new();
            graph.add_node_ids(&[src], &mut ignored);
            return Ok(());
        }
        if declared {
            graph.add_node_links(src, links, directed, lnerrs)?;
        } else {
            graph.add_node_and_links(src, links, directed, lnerrs);
        }
        Ok(())
    }
}
