// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-flow state tables.
//!
//! Every flow table of a datapath has a state table alongside it. A
//! state table is inert until it is marked stateful; from then on it
//! maps flow keys to a 32-bit state word. Two extractors decide which
//! key a packet maps to: the lookup extractor when the pipeline reads
//! state, the update extractor when an action writes it. Because the
//! map is keyed by key bytes alone, the two may name different fields
//! of the same width (e.g. `[ipv4_src]` and `[ipv4_dst]`) to have the
//! reverse direction of a flow read the state the forward direction
//! wrote.
//!
//! The absence of an entry means state 0. Entries are created by the
//! first write to their key and live until explicitly deleted.
//!
//! # Locking
//!
//! Each table carries two locks. The configuration lock is read by
//! every packet and written only by the control path, so a control
//! request never observes a packet half way through a table. The
//! entry map lock is only taken for writing to insert or remove a
//! key; the state word of an existing entry is updated in place with
//! a compare-and-swap masked write under the read lock.

use super::global_state::masked_write;
use super::key::KeyExtractor;
use super::packet::PacketMeta;
use crate::api::Field;
use crate::api::KeyRole;
use crate::api::Masked32;
use crate::api::OpenStateError;
use crate::api::StateEntryDump;
use crate::api::StateStatsFilter;
use crate::ddi::sync::KRwLock;
use crate::provider::StateChange;
use crate::provider::StateObserver;
use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
struct TableCfg {
    stateful: bool,
    lookup: KeyExtractor,
    update: KeyExtractor,
}

#[derive(Debug)]
struct StateCell {
    /// The update extractor in force when the entry was created.
    fields: Box<[Field]>,
    state: AtomicU32,
}

impl StateCell {
    fn new(fields: &[Field]) -> Self {
        Self { fields: fields.into(), state: AtomicU32::new(0) }
    }

    fn load(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }
}

/// The state table of a single flow table.
pub struct StateTable {
    id: u8,
    cfg: KRwLock<TableCfg>,
    entries: KRwLock<BTreeMap<Vec<u8>, StateCell>>,
}

impl fmt::Debug for StateTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let cfg = self.cfg.read();
        f.debug_struct("StateTable")
            .field("id", &self.id)
            .field("stateful", &cfg.stateful)
            .field("lookup", &cfg.lookup)
            .field("update", &cfg.update)
            .field("entries", &self.len())
            .finish()
    }
}

impl StateTable {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            cfg: KRwLock::new(TableCfg::default()),
            entries: KRwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn is_stateful(&self) -> bool {
        self.cfg.read().stateful
    }

    /// The number of state entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn extractor(&self, role: KeyRole) -> KeyExtractor {
        let cfg = self.cfg.read();
        match role {
            KeyRole::Lookup => cfg.lookup.clone(),
            KeyRole::Update => cfg.update.clone(),
        }
    }

    /// Mark the table stateful or stateless.
    ///
    /// Marking an already stateful table stateful again changes
    /// nothing. Marking a table stateless discards its entries and
    /// resets both extractors.
    pub fn configure(&self, stateful: bool) {
        let mut cfg = self.cfg.write();
        if cfg.stateful == stateful {
            return;
        }

        if !stateful {
            *cfg = TableCfg::default();
            self.entries.write().clear();
        }
        cfg.stateful = stateful;
    }

    /// Install the extractor for `role`.
    ///
    /// Existing entries keep the key they were created with.
    pub fn set_extractor(
        &self,
        role: KeyRole,
        fields: Vec<Field>,
    ) -> Result<(), OpenStateError> {
        let ext = KeyExtractor::new(fields)?;
        let mut cfg = self.cfg.write();
        if !cfg.stateful {
            return Err(OpenStateError::NotStateful(self.id));
        }

        match role {
            KeyRole::Lookup => cfg.lookup = ext,
            KeyRole::Update => cfg.update = ext,
        }
        Ok(())
    }

    /// Return the state of the entry `pkt` maps to under the lookup
    /// extractor.
    ///
    /// A stateless table, a packet lacking one of the extractor's
    /// fields, and a key without an entry all read as 0.
    pub fn lookup(&self, pkt: &PacketMeta) -> u32 {
        let cfg = self.cfg.read();
        if !cfg.stateful {
            return 0;
        }

        match cfg.lookup.extract(pkt) {
            Some(key) => self.lookup_key(&key),
            None => 0,
        }
    }

    /// Return the state stored for `key`, or 0 if there is none.
    pub fn lookup_key(&self, key: &[u8]) -> u32 {
        self.entries.read().get(key).map(StateCell::load).unwrap_or(0)
    }

    /// Apply the masked write `m` to the entry `pkt` maps to under the
    /// update extractor, creating it at state 0 first if needed.
    ///
    /// Returns the new state word, or `None` if the packet lacks one
    /// of the extractor's fields and nothing was written.
    pub fn apply_state(
        &self,
        pkt: &PacketMeta,
        m: Masked32,
        obs: Option<&dyn StateObserver>,
    ) -> Result<Option<u32>, OpenStateError> {
        let cfg = self.cfg.read();
        if !cfg.stateful {
            return Err(OpenStateError::NotStateful(self.id));
        }

        let Some(key) = cfg.update.extract(pkt) else {
            return Ok(None);
        };

        Ok(Some(self.write_key(&cfg, key, m, obs)))
    }

    /// Apply the masked write `m` to the entry for `key`, creating it
    /// at state 0 first if needed.
    ///
    /// # Errors
    ///
    /// The table must be stateful and `key` must have the width of
    /// the current update extractor.
    pub fn apply_state_key(
        &self,
        key: &[u8],
        m: Masked32,
        obs: Option<&dyn StateObserver>,
    ) -> Result<u32, OpenStateError> {
        let cfg = self.cfg.read();
        if !cfg.stateful {
            return Err(OpenStateError::NotStateful(self.id));
        }

        if key.len() != cfg.update.width() {
            return Err(OpenStateError::KeyArity {
                table_id: self.id,
                expected: cfg.update.width(),
                actual: key.len(),
            });
        }

        Ok(self.write_key(&cfg, key.to_vec(), m, obs))
    }

    fn write_key(
        &self,
        cfg: &TableCfg,
        key: Vec<u8>,
        m: Masked32,
        obs: Option<&dyn StateObserver>,
    ) -> u32 {
        {
            let entries = self.entries.read();
            if let Some(cell) = entries.get(&key) {
                let state = masked_write(&cell.state, m);
                self.notify(obs, &cell.fields, &key, state, false);
                return state;
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have created the entry between dropping
        // the read lock and taking the write lock.
        let cell = entries
            .entry(key.clone())
            .or_insert_with(|| StateCell::new(cfg.update.fields()));
        let state = masked_write(&cell.state, m);
        self.notify(obs, &cell.fields, &key, state, false);
        state
    }

    fn notify(
        &self,
        obs: Option<&dyn StateObserver>,
        fields: &[Field],
        key: &[u8],
        state: u32,
        deleted: bool,
    ) {
        if let Some(obs) = obs {
            obs.state_changed(&StateChange {
                table_id: self.id,
                fields,
                key,
                state,
                deleted,
            });
        }
    }

    /// Remove the entry for `key`. Returns whether an entry existed;
    /// deleting an absent key is not an error.
    pub fn delete(
        &self,
        key: &[u8],
        obs: Option<&dyn StateObserver>,
    ) -> Result<bool, OpenStateError> {
        let cfg = self.cfg.read();
        if !cfg.stateful {
            return Err(OpenStateError::NotStateful(self.id));
        }

        let removed = self.entries.write().remove(key);
        if let Some(cell) = &removed {
            self.notify(obs, &cell.fields, key, 0, true);
        }

        Ok(removed.is_some())
    }

    /// Append a snapshot of every entry selected by `filter` to `out`,
    /// in key order. Each entry is read atomically; the table as a
    /// whole is not frozen.
    pub fn export(
        &self,
        filter: &StateStatsFilter,
        out: &mut Vec<StateEntryDump>,
    ) {
        if !filter.table.contains(self.id) {
            return;
        }

        let entries = self.entries.read();
        for (key, cell) in entries.iter() {
            if !filter.is_match(self.id, &cell.fields, key) {
                continue;
            }

            out.push(StateEntryDump {
                table_id: self.id,
                fields: cell.fields.to_vec(),
                key: key.clone(),
                state: cell.load(),
            });
        }
    }
}

/// The state tables of every flow table of a datapath, indexed by
/// table id.
pub struct StateTables {
    tables: Box<[StateTable]>,
    observer: Option<Arc<dyn StateObserver>>,
}

impl fmt::Debug for StateTables {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StateTables")
            .field("tables", &self.tables)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl StateTables {
    /// Create `n_tables` state tables with ids `0..n_tables`, all
    /// stateless.
    pub fn new(
        n_tables: u8,
        observer: Option<Arc<dyn StateObserver>>,
    ) -> Self {
        let tables = (0..n_tables).map(StateTable::new).collect();
        Self { tables, observer }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn get(&self, table_id: u8) -> Option<&StateTable> {
        self.tables.get(usize::from(table_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateTable> {
        self.tables.iter()
    }

    fn table(&self, table_id: u8) -> Result<&StateTable, OpenStateError> {
        self.get(table_id).ok_or(OpenStateError::InvalidTableId(table_id))
    }

    fn obs(&self) -> Option<&dyn StateObserver> {
        self.observer.as_deref()
    }

    pub fn configure(
        &self,
        table_id: u8,
        stateful: bool,
    ) -> Result<(), OpenStateError> {
        self.table(table_id)?.configure(stateful);
        Ok(())
    }

    pub fn set_extractor(
        &self,
        table_id: u8,
        role: KeyRole,
        fields: Vec<Field>,
    ) -> Result<(), OpenStateError> {
        self.table(table_id)?.set_extractor(role, fields)
    }

    /// The state `pkt` reads in `table_id`. An unknown table reads as
    /// 0, like a stateless one.
    pub fn lookup(&self, table_id: u8, pkt: &PacketMeta) -> u32 {
        self.get(table_id).map(|t| t.lookup(pkt)).unwrap_or(0)
    }

    pub fn apply_state(
        &self,
        table_id: u8,
        pkt: &PacketMeta,
        m: Masked32,
    ) -> Result<Option<u32>, OpenStateError> {
        self.table(table_id)?.apply_state(pkt, m, self.obs())
    }

    pub fn apply_state_key(
        &self,
        table_id: u8,
        key: &[u8],
        m: Masked32,
    ) -> Result<u32, OpenStateError> {
        self.table(table_id)?.apply_state_key(key, m, self.obs())
    }

    pub fn delete(
        &self,
        table_id: u8,
        key: &[u8],
    ) -> Result<bool, OpenStateError> {
        self.table(table_id)?.delete(key, self.obs())
    }

    /// Snapshot every entry selected by `filter`, ordered by table id
    /// and then key.
    pub fn export(&self, filter: &StateStatsFilter) -> Vec<StateEntryDump> {
        let mut out = vec![];
        for t in self.tables.iter() {
            t.export(filter, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::FieldMatch;
    use crate::api::Substate;
    use crate::api::TableSel;
    use crate::ddi::sync::KMutex;
    use crate::engine::packet::Ipv4Meta;
    use core::net::Ipv4Addr;
    use std::thread;

    fn ip_pkt(src: [u8; 4], dst: [u8; 4]) -> PacketMeta {
        PacketMeta {
            ip: Some(Ipv4Meta {
                src: Ipv4Addr::from(src),
                dst: Ipv4Addr::from(dst),
                proto: 6,
            }),
            ..Default::default()
        }
    }

    fn stateful_src_tables() -> StateTables {
        let tables = StateTables::new(4, None);
        tables.configure(1, true).unwrap();
        for role in [KeyRole::Lookup, KeyRole::Update] {
            tables.set_extractor(1, role, vec![Field::Ipv4Src]).unwrap();
        }
        tables
    }

    #[test]
    fn extractor_requires_stateful() {
        let tables = StateTables::new(2, None);
        assert_eq!(
            tables.set_extractor(0, KeyRole::Lookup, vec![Field::Ipv4Src]),
            Err(OpenStateError::NotStateful(0))
        );
        assert_eq!(
            tables.configure(2, true),
            Err(OpenStateError::InvalidTableId(2))
        );
    }

    #[test]
    fn stateless_lookup_is_zero() {
        let tables = StateTables::new(2, None);
        let pkt = ip_pkt([10, 0, 0, 1], [10, 0, 0, 2]);
        for id in 0..=u8::MAX {
            assert_eq!(tables.lookup(id, &pkt), 0);
        }

        // Stateful but never written.
        tables.configure(0, true).unwrap();
        assert_eq!(tables.lookup(0, &pkt), 0);
        assert_eq!(
            tables.apply_state(1, &pkt, Masked32::exact(1)),
            Err(OpenStateError::NotStateful(1))
        );
    }

    #[test]
    fn apply_state_is_idempotent() {
        let tables = stateful_src_tables();
        let pkt = ip_pkt([10, 0, 0, 1], [10, 0, 0, 2]);
        tables.apply_state(1, &pkt, Masked32::exact(0xF0F0_0000)).unwrap();

        let m = Masked32::new(0x0000_0A00, 0x0000_FF00);
        let once = tables.apply_state(1, &pkt, m).unwrap();
        let twice = tables.apply_state(1, &pkt, m).unwrap();
        assert_eq!(once, Some(0xF0F0_0A00));
        assert_eq!(once, twice);
        assert_eq!(tables.lookup(1, &pkt), 0xF0F0_0A00);
        assert_eq!(tables.get(1).unwrap().len(), 1);
    }

    #[test]
    fn delete_absent_is_noop() {
        let tables = stateful_src_tables();
        let pkt = ip_pkt([10, 0, 0, 1], [10, 0, 0, 2]);
        tables.apply_state(1, &pkt, Masked32::exact(3)).unwrap();
        let before = tables.export(&StateStatsFilter::default());

        assert_eq!(tables.delete(1, &[10, 0, 0, 9]), Ok(false));
        assert_eq!(tables.export(&StateStatsFilter::default()), before);

        assert_eq!(tables.delete(1, &[10, 0, 0, 1]), Ok(true));
        assert_eq!(tables.delete(1, &[10, 0, 0, 1]), Ok(false));
        assert_eq!(tables.lookup(1, &pkt), 0);
    }

    #[test]
    fn cross_referenced_extractors() {
        let tables = StateTables::new(1, None);
        tables.configure(0, true).unwrap();
        tables
            .set_extractor(0, KeyRole::Lookup, vec![Field::Ipv4Dst])
            .unwrap();
        tables
            .set_extractor(0, KeyRole::Update, vec![Field::Ipv4Src])
            .unwrap();

        let fwd = ip_pkt([10, 0, 0, 1], [10, 0, 0, 2]);
        let rev = ip_pkt([10, 0, 0, 2], [10, 0, 0, 1]);
        tables.apply_state(0, &fwd, Masked32::exact(7)).unwrap();

        // The forward packet wrote under its source; the reply reads
        // under its destination, which is the same address.
        assert_eq!(tables.lookup(0, &rev), 7);
        assert_eq!(tables.lookup(0, &fwd), 0);
    }

    #[test]
    fn key_arity_checked() {
        let tables = stateful_src_tables();
        let key = [10, 0, 0, 1, 0, 80];
        assert_eq!(
            tables.apply_state_key(1, &key, Masked32::exact(1)),
            Err(OpenStateError::KeyArity {
                table_id: 1,
                expected: 4,
                actual: 6
            })
        );
        assert_eq!(
            tables.apply_state_key(1, &[10, 0, 0, 1], Masked32::exact(1)),
            Ok(1)
        );
    }

    #[test]
    fn entries_keep_their_creation_extractor() {
        let tables = stateful_src_tables();
        let key = [10, 0, 0, 1];
        tables.apply_state_key(1, &key, Masked32::exact(1)).unwrap();
        tables
            .set_extractor(
                1,
                KeyRole::Update,
                vec![Field::Ipv4Src, Field::TcpDst],
            )
            .unwrap();
        tables
            .apply_state_key(1, &[10, 0, 0, 1, 0, 80], Masked32::exact(2))
            .unwrap();

        let dump = tables.export(&StateStatsFilter::default());
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].fields, vec![Field::Ipv4Src]);
        assert_eq!(dump[0].state, 1);
        assert_eq!(dump[1].fields, vec![Field::Ipv4Src, Field::TcpDst]);
        assert_eq!(dump[1].key_str(), "ipv4_src=10.0.0.1,tcp_dst=80");
    }

    #[test]
    fn substate_end_to_end() {
        let tables = stateful_src_tables();
        let ss = Substate::new(1, 1).unwrap();
        let m = ss.pack(2).unwrap();
        tables.apply_state_key(1, &[10, 0, 0, 3], m).unwrap();

        let pkt = ip_pkt([10, 0, 0, 3], [10, 0, 0, 4]);
        assert_eq!(ss.unpack(tables.lookup(1, &pkt)), 2);

        tables.delete(1, &[10, 0, 0, 3]).unwrap();
        assert_eq!(tables.lookup(1, &pkt), 0);
    }

    #[test]
    fn export_filters() {
        let tables = stateful_src_tables();
        tables.configure(2, true).unwrap();
        tables
            .set_extractor(2, KeyRole::Update, vec![Field::Ipv4Dst])
            .unwrap();

        let writes = [
            (1, [10, 0, 0, 2], 2),
            (1, [10, 0, 0, 1], 1),
            (2, [10, 0, 0, 1], 3),
        ];
        for (id, key, state) in writes {
            tables.apply_state_key(id, &key, Masked32::exact(state)).unwrap();
        }

        let all = tables.export(&StateStatsFilter::default());
        let order: Vec<(u8, u32)> =
            all.iter().map(|e| (e.table_id, e.state)).collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 3)]);

        let one = tables.export(&StateStatsFilter::table(TableSel::One(2)));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].state, 3);

        let by_src = StateStatsFilter {
            table: TableSel::All,
            matches: vec![FieldMatch::parse("ipv4_src=10.0.0.1").unwrap()],
        };
        let dump = tables.export(&by_src);
        assert_eq!(dump.len(), 1);
        assert_eq!((dump[0].table_id, dump[0].state), (1, 1));
    }

    #[test]
    fn stateless_discards_entries() {
        let tables = stateful_src_tables();
        let key = [10, 0, 0, 1];
        tables.apply_state_key(1, &key, Masked32::exact(1)).unwrap();
        tables.configure(1, true).unwrap();
        assert_eq!(tables.get(1).unwrap().len(), 1);

        tables.configure(1, false).unwrap();
        assert_eq!(tables.get(1).unwrap().len(), 0);
        let t = tables.get(1).unwrap();
        assert!(t.extractor(KeyRole::Update).is_empty());
        assert!(!t.is_stateful());
    }

    #[derive(Default)]
    struct Recorder {
        seen: KMutex<Vec<(Vec<u8>, u32, bool)>>,
    }

    impl StateObserver for Recorder {
        fn state_changed(&self, change: &StateChange<'_>) {
            self.seen.lock().push((
                change.key.to_vec(),
                change.state,
                change.deleted,
            ));
        }
    }

    #[test]
    fn observer_sees_writes_and_deletes() {
        let rec = Arc::new(Recorder::default());
        let tables = StateTables::new(1, Some(rec.clone()));
        tables.configure(0, true).unwrap();
        tables
            .set_extractor(0, KeyRole::Update, vec![Field::IpProto])
            .unwrap();

        tables.apply_state_key(0, &[6], Masked32::exact(4)).unwrap();
        tables.delete(0, &[6]).unwrap();
        tables.delete(0, &[6]).unwrap();

        let seen = rec.seen.lock();
        assert_eq!(*seen, vec![(vec![6], 4, false), (vec![6], 0, true)]);
    }

    #[test]
    fn concurrent_writes_to_one_key() {
        let tables = Arc::new(stateful_src_tables());
        let handles = (1..=4u32)
            .map(|sec| {
                let tables = Arc::clone(&tables);
                thread::spawn(move || {
                    let ss = Substate::new(sec, 4).unwrap();
                    for v in 0..=255 {
                        let m = ss.pack(v).unwrap();
                        let key = [10, 0, 0, 1];
                        tables.apply_state_key(1, &key, m).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        let t = tables.get(1).unwrap();
        assert_eq!(t.lookup_key(&[10, 0, 0, 1]), u32::MAX);
    }
}
