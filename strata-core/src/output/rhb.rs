//! Readable Hierarchy from Bottom writer.
//!
//! Dumps the whole dendrogram: a header, the node→owner section, then one
//! section per level listing each cluster's owners. Shares are written only
//! when the owners split unevenly.

use std::io::Write;

use crate::error::{Result, StrataError};
use crate::hierarchy::{Hierarchy, OwnerRef};
use crate::profile::Membership;

use super::cnl::format_g;

/// Writes the full hierarchy in the RHB format.
///
/// # Errors
/// Returns [`StrataError::Io`] on write failure.
pub fn write_rhb<W: Write>(hier: &Hierarchy, mut out: W) -> Result<()> {
    let io_err = |source| StrataError::Io {
        path: "<hierarchy dump>".into(),
        source,
    };

    writeln!(
        out,
        "/Hierarchy levels:{} clusters:{}",
        hier.levels().len(),
        hier.score().clusters
    )
    .map_err(io_err)?;

    writeln!(out, "\n/Nodes {}", hier.nodes().len()).map_err(io_err)?;
    writeln!(out, "# node1_id> owner1_id[:share1] owner2_id[:share2] ...").map_err(io_err)?;
    for nd in hier.nodes() {
        let owner_id = |ow: &OwnerRef| hier.levels()[0].clusters()[ow.dest as usize].id();
        write_owned(&mut out, nd.id(), nd.owners(), owner_id, hier.membership())
            .map_err(io_err)?;
    }

    for (lev, level) in hier.levels().iter().enumerate() {
        writeln!(
            out,
            "\n/Level {lev} pure:{} extended:{}",
            level.clusters().len(),
            level.fullsize()
        )
        .map_err(io_err)?;
        for cl in level.clusters() {
            let owner_id =
                |ow: &OwnerRef| hier.levels()[lev + 1].clusters()[ow.dest as usize].id();
            write_owned(&mut out, cl.id(), cl.owners(), owner_id, hier.membership())
                .map_err(io_err)?;
        }
    }
    out.flush().map_err(io_err)
}

/// One ownership line: `<id>> <owner_id>[:<share>] ...`; elements without
/// owners are still listed.
fn write_owned<W: Write>(
    out: &mut W,
    id: u32,
    owners: &[OwnerRef],
    owner_id: impl Fn(&OwnerRef) -> u32,
    membership: Membership,
) -> std::io::Result<()> {
    write!(out, "{id}>")?;
    let fuzzy = membership == Membership::Fuzzy
        && owners.len() >= 2
        && owners.windows(2).any(|w| w[0].numac != w[1].numac);
    if fuzzy {
        let totac: u32 = owners.iter().map(|ow| u32::from(ow.numac)).sum();
        for ow in owners {
            let share = f64::from(ow.numac) / f64::from(totac.max(1));
            write!(out, " {}:{}", owner_id(ow), format_g(share))?;
        }
    } else {
        for ow in owners {
            write!(out, " {}", owner_id(ow))?;
        }
    }
    writeln!(out)
}
