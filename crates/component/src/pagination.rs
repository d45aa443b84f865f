//! Continuation-cursor paging over the request gateway.
//!
//! Pages are fetched strictly one after another: page N+1 is only requested
//! once page N has been parsed, with page N's cursor echoed back verbatim.
//! Any failure discards everything collected so far.

use std::collections::HashSet;

use {
    pusher_protocol::{Iq, Query},
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    gateway::IqGateway,
};

/// One parsed page: its records in wire order, and the cursor to resume
/// after if more pages exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, cursor: Option<String>) -> Self {
        Self { records, cursor }
    }

    /// A page with no continuation.
    pub fn last(records: Vec<T>) -> Self {
        Self::new(records, None)
    }
}

fn aborted(pages: usize, source: Error) -> Error {
    Error::PaginationAborted {
        pages,
        source: Box::new(source),
    }
}

/// Fetch every page of a collection.
///
/// `build` receives the resume cursor (`None` for the first page) and returns
/// the request to send. `parse` turns a reply payload into a [`Page`].
/// A cursor that was already seen during this walk is treated as a protocol
/// violation and aborts, so a peer cycling through cursors cannot keep the
/// walk going.
pub async fn collect_pages<T, B, P>(gateway: &IqGateway, mut build: B, mut parse: P) -> Result<Vec<T>>
where
    B: FnMut(Option<&str>) -> Result<Iq>,
    P: FnMut(Option<Query>) -> Result<Page<T>>,
{
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen: HashSet<String> = HashSet::new();
    let mut pages = 0usize;

    loop {
        let request = build(cursor.as_deref()).map_err(|e| aborted(pages, e))?;
        let payload = gateway.query(request).await.map_err(|e| {
            warn!(pages, cursor = ?cursor, error = %e, "page request failed, aborting");
            aborted(pages, e)
        })?;
        let page = parse(payload).map_err(|e| aborted(pages, e))?;
        pages += 1;

        debug!(
            page = pages,
            records = page.records.len(),
            cursor = ?page.cursor,
            "received page"
        );
        records.extend(page.records);

        match page.cursor {
            None => return Ok(records),
            Some(next) if seen.contains(&next) => {
                return Err(aborted(
                    pages,
                    Error::malformed(format!("continuation cursor {next} repeated")),
                ));
            },
            Some(next) => {
                seen.insert(next.clone());
                cursor = Some(next);
            },
        }
    }
}
