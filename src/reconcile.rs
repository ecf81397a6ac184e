//! One read-modify-write pass over the target list for every membership
//! event.

use tracing::{debug, info, warn};

use crate::store::{DocumentStore, StoreError};
use crate::targets::{self, DedupStrategy, TargetGroup, TargetList};

/// The identity and network address of a mesh workload.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub name: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MembershipEvent {
    Added(Workload),
    Modified(Workload),
    Deleted(Workload),
}

impl MembershipEvent {
    pub fn workload(&self) -> &Workload {
        match self {
            MembershipEvent::Added(workload)
            | MembershipEvent::Modified(workload)
            | MembershipEvent::Deleted(workload) => workload,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MembershipEvent::Added(_) => "added",
            MembershipEvent::Modified(_) => "modified",
            MembershipEvent::Deleted(_) => "deleted",
        }
    }
}

/// What a pass did to the target list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PassOutcome {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetch target list failed, {0}")]
    Fetch(#[source] StoreError),

    #[error("persist target list failed, {0}")]
    Persist(#[source] StoreError),

    #[error(transparent)]
    Encode(#[from] targets::EncodeError),
}

/// Apply `event` to `list`, the list is not deduplicated here.
pub fn apply(list: &mut TargetList, event: &MembershipEvent, port: u16) -> PassOutcome {
    let address = event.workload().address.as_str();
    let known = targets::known_targets(address, port);

    match event {
        MembershipEvent::Deleted(_) => {
            let mut candidates = vec![address];
            candidates.extend(known.iter().map(String::as_str));

            match list.remove_first(&candidates) {
                Some(_) => PassOutcome::Removed,
                None => PassOutcome::Unchanged,
            }
        }
        MembershipEvent::Added(_) | MembershipEvent::Modified(_) => {
            if known.iter().any(|target| list.contains(target)) {
                return PassOutcome::Unchanged;
            }

            list.push(TargetGroup::new(targets::target_of(address, port)));
            PassOutcome::Added
        }
    }
}

/// Keeps the persisted target list in line with membership events.
///
/// The document is fetched again at the start of every pass, nothing is cached
/// between passes.
pub struct Reconciler<S> {
    store: S,
    port: u16,
    strategy: DedupStrategy,
}

impl<S: DocumentStore> Reconciler<S> {
    pub fn new(store: S, port: u16, strategy: DedupStrategy) -> Self {
        Reconciler {
            store,
            port,
            strategy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn reconcile(&self, event: &MembershipEvent) -> Result<PassOutcome, Error> {
        let mut document = self.store.get_or_create().await.map_err(Error::Fetch)?;
        let fetched = document.text().unwrap_or_default().to_string();

        let list = match TargetList::decode(&fetched) {
            Ok(list) => list,
            Err(err) => {
                warn!(
                    message = "target list is malformed, start over with an empty one",
                    document = document.name(),
                    %err,
                );

                TargetList::default()
            }
        };

        // repeated targets written by other hands are cleaned up by any pass
        let mut list = targets::deduplicate(list, self.strategy);
        let outcome = apply(&mut list, event, self.port);
        let list = targets::deduplicate(list, self.strategy);

        let text = list.encode()?;
        if text == fetched {
            debug!(
                message = "target list unchanged",
                event = event.kind(),
                workload = %event.workload().name,
                address = %event.workload().address,
            );

            return Ok(PassOutcome::Unchanged);
        }

        document.set_text(text);
        self.store.update(document).await.map_err(Error::Persist)?;

        info!(
            message = "target list updated",
            event = event.kind(),
            workload = %event.workload().name,
            address = %event.workload().address,
            ?outcome,
            groups = list.len(),
        );

        Ok(outcome)
    }
}
