//! Network-Specified-by-Links parser: one `<src> <dst> [<weight>]` line per
//! link, the NSE variant undirected and the NSA variant directed.
//!
//! An optional leading comment header declares the node and link counts and
//! whether the network is weighted:
//! `# Nodes: <n> Edges: <m> Weighted: <0|1>`. Consecutive lines sharing a
//! source are batched so declared networks can be reduced at ingestion.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use strata_core::{Graph, GraphOptions, InputLink, LinkErrors, Result};

use super::{format_error, io_error, parse_member, ParseOptions};

/// Parser for `.nse` / `.nsa` link lists.
#[derive(Debug)]
pub struct NslParser {
    path: PathBuf,
    directed: bool,
    opts: ParseOptions,
}

/// Counts declared by the optional header comment.
#[derive(Clone, Copy, Debug, Default)]
struct Header {
    nodes: u32,
    links: u64,
    weighted: Option<bool>,
}

impl NslParser {
    /// Creates a parser; `directed` selects the NSA interpretation.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, directed: bool, opts: ParseOptions) -> Self {
        Self {
            path: path.into(),
            directed,
            opts,
        }
    }

    /// Reads the file and builds the graph.
    ///
    /// # Errors
    /// Returns input-format errors with file and line context, and I/O
    /// errors verbatim.
    pub fn build(&self) -> Result<Graph> {
        let file = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        let size = file
            .metadata()
            .map(|m| m.len())
            .unwrap_or_default();
        let reader = BufReader::new(file);

        let mut header = Header::default();
        let mut graph: Option<Graph> = None;
        let mut lnerrs = LinkErrors::new();
        let mut batch_src: Option<u32> = None;
        let mut batch: Vec<InputLink> = Vec::new();
        let mut parsed_links = 0u64;

        for (lineno, line) in reader.lines().enumerate() {
            let lineno = lineno as u64 + 1;
            let line = line.map_err(|e| io_error(&self.path, e))?;
            let body = line.trim();
            if body.is_empty() {
                continue;
            }
            if let Some(comment) = body.strip_prefix('#') {
                if graph.is_none() {
                    parse_header(comment, &mut header);
                }
                continue;
            }
            if graph.is_none() {
                let expected = if header.nodes > 0 {
                    header.nodes
                } else {
                    estimate_nodes(size, self.directed)
                };
                graph = Some(self.graph_for(expected, header.weighted.unwrap_or(true))?);
            }
            let graph = graph.as_mut().expect("created above");

            let mut tokens = body.split_whitespace();
            let src = parse_id(tokens.next(), &self.path, lineno, "source id")?;
            let dst = parse_id(tokens.next(), &self.path, lineno, "destination id")?;
            let link = match tokens.next() {
                Some(w) => {
                    let (_, weight) = parse_member(&format!("{dst}:{w}"), &self.path, lineno)?;
                    InputLink::weighted(dst, weight.expect("weight token parsed"))
                }
                None => InputLink::new(dst),
            };
            if tokens.next().is_some() {
                return Err(format_error(
                    &self.path,
                    lineno,
                    "trailing payload after the weight",
                ));
            }
            parsed_links += 1;

            if batch_src != Some(src) && !batch.is_empty() {
                let prev = batch_src.expect("non-empty batch has a source");
                graph.add_node_and_links(
                    prev,
                    std::mem::take(&mut batch),
                    self.directed,
                    &mut lnerrs,
                );
            }
            batch_src = Some(src);
            batch.push(link);
        }
        if let (Some(src), Some(graph)) = (batch_src, graph.as_mut()) {
            if !batch.is_empty() {
                graph.add_node_and_links(src, batch, self.directed, &mut lnerrs);
            }
        }

        lnerrs.show();
        if header.links > 0 && header.links != parsed_links {
            warn!(
                declared = header.links,
                parsed = parsed_links,
                "link count in the header does not match the payload"
            );
        }
        let graph = match graph {
            Some(g) => g,
            None => self.graph_for(0, header.weighted.unwrap_or(true))?,
        };
        debug!(
            nodes = graph.nodes().len(),
            links = parsed_links,
            directed = self.directed,
            "nsl network loaded"
        );
        Ok(graph)
    }

    fn graph_for(&self, expected_nodes: u32, weighted: bool) -> Result<Graph> {
        Graph::new(GraphOptions {
            expected_nodes,
            shuffle: self.opts.shuffle,
            sum_duplicates: self.opts.sum_duplicates,
            reduction: if expected_nodes > 0 && weighted && self.directed {
                self.opts.reduction
            } else {
                strata_core::ReductionPolicy::None
            },
            weighted,
        })
    }
}

fn parse_id(token: Option<&str>, path: &Path, lineno: u64, what: &str) -> Result<u32> {
    let token = token.ok_or_else(|| format_error(path, lineno, format!("missing {what}")))?;
    token
        .parse()
        .map_err(|_| format_error(path, lineno, format!("invalid {what} `{token}`")))
}

/// Reads `Nodes:`, `Edges:`/`Arcs:`/`Links:`, and `Weighted:` keys from a
/// header comment; unknown keys are ignored.
fn parse_header(comment: &str, header: &mut Header) {
    let mut tokens = comment.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let key = token.trim_end_matches(':').to_ascii_lowercase();
        let value = match tokens.peek() {
            Some(v) => *v,
            None => break,
        };
        match key.as_str() {
            "nodes" => {
                if let Ok(v) = value.parse() {
                    header.nodes = v;
                    tokens.next();
                }
            }
            "edges" | "arcs" | "links" => {
                if let Ok(v) = value.parse() {
                    header.links = v;
                    tokens.next();
                }
            }
            "weighted" => {
                if let Ok(v) = value.parse::<u8>() {
                    header.weighted = Some(v != 0);
                    tokens.next();
                }
            }
            _ => {}
        }
    }
}

/// Expected node count from the file size when no header declares it; the
/// estimate deliberately undershoots so preallocation never explodes.
fn estimate_nodes(size_bytes: u64, directed: bool) -> u32 {
    if size_bytes == 0 {
        return 0;
    }
    // Roughly two ids and a weight per line.
    let mut elements = size_bytes / 12;
    if directed {
        elements /= 2;
    }
    (elements as f64).powf(0.78) as u32
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn parse(content: &str, directed: bool) -> Result<Graph> {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write content");
        NslParser::new(file.path(), directed, ParseOptions::default()).build()
    }

    #[test]
    fn nse_lines_build_an_undirected_graph() {
        let g = parse("# Nodes: 3 Edges: 3 Weighted: 1\n0 1 2.0\n0 2 1.0\n1 2 1.5\n", false)
            .expect("parses");
        assert!(!g.directed());
        assert_eq!(g.nodes().len(), 3);
        assert_eq!(g.node(2).expect("exists").links().len(), 2);
    }

    #[test]
    fn nsa_lines_build_a_directed_graph() {
        let g = parse("0 1 1\n1 0 2\n", true).expect("parses");
        assert!(g.directed());
        assert_eq!(g.node(0).expect("exists").links().len(), 1);
        assert_eq!(g.node(1).expect("exists").links().len(), 1);
    }

    #[test]
    fn missing_weight_defaults_to_one() {
        let g = parse("0 1\n", false).expect("parses");
        assert_eq!(g.node(0).expect("exists").links()[0].weight, 1.0);
    }

    #[test]
    fn malformed_lines_carry_context() {
        let err = parse("0\n", false).expect_err("missing destination");
        let msg = err.to_string();
        assert!(msg.contains("line 1"), "message: {msg}");
        assert!(msg.contains("destination id"), "message: {msg}");
    }

    #[test]
    fn header_parsing_reads_known_keys() {
        let mut header = Header::default();
        parse_header(" Nodes: 42 Arcs: 7 Weighted: 0", &mut header);
        assert_eq!(header.nodes, 42);
        assert_eq!(header.links, 7);
        assert_eq!(header.weighted, Some(false));
    }

    #[test]
    fn node_estimate_grows_sublinearly() {
        assert_eq!(estimate_nodes(0, false), 0);
        let small = estimate_nodes(10_000, false);
        let large = estimate_nodes(1_000_000, false);
        assert!(small > 0 && large > small);
        assert!((large as u64) < 1_000_000 / 12);
    }
}
