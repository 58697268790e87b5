//! Stable textual dump and restore of the whole tree.
//!
//! The dump is sectioned and brace-framed: the state pool, then the
//! belief tree (belief nodes nest inside the observation entries of
//! their parent action node), then the histories. Entries are emitted
//! under stable sort keys (dense state index, belief id, bin number,
//! construction-vector fingerprint, formatted observation text, cluster
//! insertion order) so that save, load, save again is byte-identical.
//!
//! Floats are printed with `{:?}` (shortest round-trip form), so a
//! parsed value re-emits to the same bytes.

use crate::arena::Arena;
use crate::histories::{Histories, HistoryEntry, SeqId};
use crate::mappings::{
    ActionMapping, ApproximateObservationMap, ContinuousActionMap, DiscreteObservationMap,
    DiscretizedActionMap, EntryKey, ObservationMapping,
};
use crate::node::{ActionNode, ActionNodeId, BeliefId, BeliefNode};
use crate::state_pool::{StateId, StatePool};
use crate::tree::BeliefTree;
use abtree_core::{Model, ObservationSpace, PlannerError, Result};
use std::collections::HashMap;
use std::fmt::Write as _;

const HEADER: &str = "abtree v1";

/* ------------------------------- emission ------------------------------- */

struct Emitter {
    out: String,
    indent: usize,
}

impl Emitter {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, header: &str) {
        self.line(&format!("{header} {{"));
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }
}

fn fmt_vec(vector: &[f64]) -> String {
    let mut s = String::from("[");
    for x in vector {
        let _ = write!(s, " {x:?}");
    }
    s.push_str(" ]");
    s
}

/// Emit the pool, tree, and histories as one stable text dump.
pub(crate) fn emit<M: Model>(
    model: &M,
    pool: &StatePool<M>,
    tree: &BeliefTree<M>,
    histories: &Histories<M>,
) -> Result<String> {
    let mut em = Emitter::new();
    em.line(HEADER);

    // State pool: referenced states under dense indexes, in id order.
    let state_ids = pool.all_states();
    let mut dense: HashMap<StateId, usize> = HashMap::new();
    em.open("pool");
    em.line(&format!("{} states", state_ids.len()));
    for (index, id) in state_ids.iter().enumerate() {
        dense.insert(*id, index);
        em.line(&format!(
            "state {index} \"{}\"",
            model.format_state(pool.state(*id))
        ));
    }
    em.close();

    emit_belief(model, tree, tree.root(), &mut em)?;

    em.open("histories");
    let seq_ids = histories.ids();
    em.line(&format!("{} sequences", seq_ids.len()));
    for seq_id in seq_ids {
        let sequence = histories.get(seq_id);
        em.open(&format!(
            "seq terminal {} leaf {:?}",
            sequence.terminal, sequence.leaf_value
        ));
        for entry in &sequence.entries {
            let state = dense
                .get(&entry.state)
                .expect("BUG: history references an unpooled state");
            let belief = tree.belief(entry.belief).id();
            match (&entry.action, &entry.observation) {
                (Some(action), Some(observation)) => em.line(&format!(
                    "entry state {state} belief {belief} reward {:?} action \"{}\" obs \"{}\"",
                    entry.reward,
                    model.format_action(action),
                    model.format_observation(observation),
                )),
                _ => em.line(&format!("entry state {state} belief {belief}")),
            }
        }
        em.close();
    }
    em.close();

    Ok(em.out)
}

fn emit_belief<M: Model>(
    model: &M,
    tree: &BeliefTree<M>,
    id: BeliefId,
    em: &mut Emitter,
) -> Result<()> {
    let node = tree.belief(id);
    em.open(&format!(
        "belief {} depth {} start {} end {} value {:?}",
        node.id(),
        node.depth(),
        node.n_starting_sequences(),
        node.n_ending_sequences(),
        node.value(),
    ));
    emit_action_map(model, tree, node.action_map(), em)?;
    em.close();
    Ok(())
}

fn emit_action_map<M: Model>(
    model: &M,
    tree: &BeliefTree<M>,
    map: &ActionMapping<M>,
    em: &mut Emitter,
) -> Result<()> {
    let mut views = map.entry_views();
    views.sort_by_key(|v| v.key);

    match map {
        ActionMapping::Discretized(disc) => {
            let queue: String = {
                let mut s = String::from("[");
                for bin in disc.remaining_bins() {
                    let _ = write!(s, " {bin}");
                }
                s.push_str(" ]");
                s
            };
            em.open(&format!(
                "actmap discretized bins {} visits {} queue {queue}",
                disc.bins(),
                map.total_visit_count()
            ));
        }
        ActionMapping::Continuous(cont) => {
            let (tag, state) = cont.chooser_state();
            let fixed: String = {
                let mut s = String::from("[");
                for vector in cont.remaining_fixed() {
                    let _ = write!(s, " vec {}", fmt_vec(&vector));
                }
                s.push_str(" ]");
                s
            };
            em.open(&format!(
                "actmap continuous visits {} chooser \"{tag}\" state \"{state}\" fixedqueue {fixed}",
                map.total_visit_count()
            ));
        }
    }

    for view in views {
        let header = match (&view.key, &view.vector) {
            (EntryKey::Bin(bin), _) => format!(
                "entry bin {bin} action \"{}\" legal {} visits {} q {:?}",
                model.format_action(&view.action),
                view.legal,
                view.visit_count,
                view.total_q,
            ),
            (EntryKey::Fingerprint(_), Some(vector)) => format!(
                "entry vec {} legal {} visits {} q {:?}",
                fmt_vec(vector),
                view.legal,
                view.visit_count,
                view.total_q,
            ),
            (EntryKey::Fingerprint(_), None) => {
                return Err(PlannerError::NumericDegeneracy(
                    "continuous entry without a construction vector".into(),
                ))
            }
        };
        em.open(&header);
        if let Some(child) = view.child {
            emit_action_node(model, tree, child, em)?;
        }
        em.close();
    }
    em.close();
    Ok(())
}

fn emit_action_node<M: Model>(
    model: &M,
    tree: &BeliefTree<M>,
    id: ActionNodeId,
    em: &mut Emitter,
) -> Result<()> {
    let node = tree.action_node(id);
    em.open(&format!(
        "actnode particles {} q {:?}",
        node.n_particles(),
        node.total_q()
    ));

    match node.obs_map() {
        ObservationMapping::Discrete(map) => {
            em.open(&format!("obsmap discrete visits {}", map.total_visit_count()));
            let mut entries: Vec<_> = map.entries().iter().collect();
            entries.sort_by_key(|e| model.format_observation(&e.observation));
            for entry in entries {
                em.open(&format!(
                    "obs \"{}\" visits {}",
                    model.format_observation(&entry.observation),
                    entry.visits
                ));
                emit_belief(model, tree, entry.child, em)?;
                em.close();
            }
            em.close();
        }
        ObservationMapping::Approximate(map) => {
            em.open(&format!(
                "obsmap approximate tau {:?} visits {}",
                map.threshold(),
                map.total_visit_count()
            ));
            // Cluster insertion order is the stable key here: it is the
            // cluster id and carries the routing tie-break.
            for entry in map.entries() {
                em.open(&format!(
                    "obs \"{}\" visits {}",
                    model.format_observation(&entry.observation),
                    entry.visits
                ));
                emit_belief(model, tree, entry.child, em)?;
                em.close();
            }
            em.close();
        }
    }

    em.close();
    Ok(())
}

/* -------------------------------- parsing -------------------------------- */

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
}

struct Lexer {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
}

impl Lexer {
    fn new(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for (line_index, line) in text.lines().enumerate() {
            let line_no = line_index + 1;
            let mut rest = line.trim();
            while !rest.is_empty() {
                if let Some(stripped) = rest.strip_prefix('{') {
                    tokens.push((line_no, Tok::LBrace));
                    rest = stripped.trim_start();
                } else if let Some(stripped) = rest.strip_prefix('}') {
                    tokens.push((line_no, Tok::RBrace));
                    rest = stripped.trim_start();
                } else if let Some(stripped) = rest.strip_prefix('[') {
                    tokens.push((line_no, Tok::LBracket));
                    rest = stripped.trim_start();
                } else if let Some(stripped) = rest.strip_prefix(']') {
                    tokens.push((line_no, Tok::RBracket));
                    rest = stripped.trim_start();
                } else if let Some(stripped) = rest.strip_prefix('"') {
                    let Some(end) = stripped.find('"') else {
                        return Err(PlannerError::mismatch(line_no, "unterminated string"));
                    };
                    tokens.push((line_no, Tok::Str(stripped[..end].to_string())));
                    rest = stripped[end + 1..].trim_start();
                } else {
                    let end = rest
                        .find(|c: char| c.is_whitespace() || "{}[]\"".contains(c))
                        .unwrap_or(rest.len());
                    tokens.push((line_no, Tok::Word(rest[..end].to_string())));
                    rest = rest[end..].trim_start();
                }
            }
        }
        Ok(Self { tokens, pos: 0 })
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |(line, _)| *line)
    }

    fn next(&mut self) -> Result<Tok> {
        let tok = self
            .tokens
            .get(self.pos)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| PlannerError::mismatch(self.line(), "unexpected end of dump"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn expect_word(&mut self, expected: &str) -> Result<()> {
        match self.next()? {
            Tok::Word(w) if w == expected => Ok(()),
            other => Err(PlannerError::mismatch(
                self.line(),
                format!("expected {expected:?}, found {other:?}"),
            )),
        }
    }

    fn word(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Word(w) => Ok(w),
            other => Err(PlannerError::mismatch(
                self.line(),
                format!("expected a word, found {other:?}"),
            )),
        }
    }

    fn string(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Str(s) => Ok(s),
            other => Err(PlannerError::mismatch(
                self.line(),
                format!("expected a string, found {other:?}"),
            )),
        }
    }

    fn open(&mut self) -> Result<()> {
        match self.next()? {
            Tok::LBrace => Ok(()),
            other => Err(PlannerError::mismatch(
                self.line(),
                format!("expected '{{', found {other:?}"),
            )),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.next()? {
            Tok::RBrace => Ok(()),
            other => Err(PlannerError::mismatch(
                self.line(),
                format!("expected '}}', found {other:?}"),
            )),
        }
    }

    fn usize_(&mut self) -> Result<usize> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| PlannerError::mismatch(self.line(), format!("bad integer {w:?}")))
    }

    fn u64_(&mut self) -> Result<u64> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| PlannerError::mismatch(self.line(), format!("bad integer {w:?}")))
    }

    fn i64_(&mut self) -> Result<i64> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| PlannerError::mismatch(self.line(), format!("bad integer {w:?}")))
    }

    fn f64_(&mut self) -> Result<f64> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| PlannerError::mismatch(self.line(), format!("bad number {w:?}")))
    }

    fn bool_(&mut self) -> Result<bool> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| PlannerError::mismatch(self.line(), format!("bad bool {w:?}")))
    }

    fn usize_list(&mut self) -> Result<Vec<usize>> {
        match self.next()? {
            Tok::LBracket => {}
            other => {
                return Err(PlannerError::mismatch(
                    self.line(),
                    format!("expected '[', found {other:?}"),
                ))
            }
        }
        let mut values = Vec::new();
        loop {
            match self.next()? {
                Tok::RBracket => return Ok(values),
                Tok::Word(w) => values.push(w.parse().map_err(|_| {
                    PlannerError::mismatch(self.line(), format!("bad integer {w:?}"))
                })?),
                other => {
                    return Err(PlannerError::mismatch(
                        self.line(),
                        format!("expected an integer or ']', found {other:?}"),
                    ))
                }
            }
        }
    }

    fn f64_list(&mut self) -> Result<Vec<f64>> {
        match self.next()? {
            Tok::LBracket => {}
            other => {
                return Err(PlannerError::mismatch(
                    self.line(),
                    format!("expected '[', found {other:?}"),
                ))
            }
        }
        let mut values = Vec::new();
        loop {
            match self.next()? {
                Tok::RBracket => return Ok(values),
                Tok::Word(w) => values.push(w.parse().map_err(|_| {
                    PlannerError::mismatch(self.line(), format!("bad number {w:?}"))
                })?),
                other => {
                    return Err(PlannerError::mismatch(
                        self.line(),
                        format!("expected a number or ']', found {other:?}"),
                    ))
                }
            }
        }
    }
}

struct Restorer<'m, M: Model> {
    model: &'m M,
    beliefs: Arena<BeliefNode<M>>,
    actions: Arena<ActionNode<M>>,
    by_id: HashMap<u64, BeliefId>,
    next_id: u64,
}

/// Parse a dump written by [`emit`], rebuilding the pool, tree, and
/// histories. Malformed input or dangling references fail with
/// [`PlannerError::SerializationMismatch`]; nothing is constructed.
pub(crate) fn parse<M: Model>(
    model: &M,
    threshold: f64,
    dump: &str,
) -> Result<(StatePool<M>, BeliefTree<M>, Histories<M>)> {
    let mut lx = Lexer::new(dump)?;
    lx.expect_word("abtree")?;
    lx.expect_word("v1")?;

    // Pool section.
    let mut pool = StatePool::new();
    let mut states_by_index: Vec<StateId> = Vec::new();
    lx.expect_word("pool")?;
    lx.open()?;
    let n_states = lx.usize_()?;
    lx.expect_word("states")?;
    for expected in 0..n_states {
        lx.expect_word("state")?;
        let index = lx.usize_()?;
        if index != expected {
            return Err(PlannerError::mismatch(
                lx.line(),
                format!("state index {index} out of order (expected {expected})"),
            ));
        }
        let text = lx.string()?;
        let state = self_describe(&mut lx, model.parse_state(&text))?;
        states_by_index.push(pool.add_or_get_canonical(state));
    }
    lx.close()?;

    // Tree section.
    let mut restorer = Restorer {
        model,
        beliefs: Arena::new(),
        actions: Arena::new(),
        by_id: HashMap::new(),
        next_id: 0,
    };
    let root = parse_belief(&mut lx, &mut restorer, None, 0)?;
    let tree_next_id = restorer.next_id;

    // Histories section.
    let mut histories: Histories<M> = Histories::new();
    let mut registrations: Vec<(BeliefId, SeqId, usize)> = Vec::new();
    lx.expect_word("histories")?;
    lx.open()?;
    let n_sequences = lx.usize_()?;
    lx.expect_word("sequences")?;
    for _ in 0..n_sequences {
        lx.expect_word("seq")?;
        lx.expect_word("terminal")?;
        let terminal = lx.bool_()?;
        lx.expect_word("leaf")?;
        let leaf_value = lx.f64_()?;
        lx.open()?;

        let seq = histories.create();
        {
            let sequence = histories.get_mut(seq);
            sequence.terminal = terminal;
            sequence.leaf_value = leaf_value;
        }

        while matches!(lx.peek(), Some(Tok::Word(w)) if w == "entry") {
            lx.expect_word("entry")?;
            lx.expect_word("state")?;
            let state_index = lx.usize_()?;
            let state_id = *states_by_index.get(state_index).ok_or_else(|| {
                PlannerError::mismatch(lx.line(), format!("unknown state index {state_index}"))
            })?;
            lx.expect_word("belief")?;
            let belief_file_id = lx.u64_()?;
            let belief = *restorer.by_id.get(&belief_file_id).ok_or_else(|| {
                PlannerError::mismatch(lx.line(), format!("unknown belief id {belief_file_id}"))
            })?;

            let mut entry = HistoryEntry::leaf(state_id, belief);
            if matches!(lx.peek(), Some(Tok::Word(w)) if w == "reward") {
                lx.expect_word("reward")?;
                entry.reward = lx.f64_()?;
                lx.expect_word("action")?;
                let action_text = lx.string()?;
                entry.action = Some(self_describe(&mut lx, model.parse_action(&action_text))?);
                lx.expect_word("obs")?;
                let obs_text = lx.string()?;
                entry.observation =
                    Some(self_describe(&mut lx, model.parse_observation(&obs_text))?);
            }

            pool.acquire(state_id);
            let index = histories.get(seq).entries.len();
            registrations.push((belief, seq, index));
            histories.get_mut(seq).entries.push(entry);
        }
        lx.close()?;

        if histories.get(seq).is_empty() {
            return Err(PlannerError::mismatch(lx.line(), "sequence with no entries"));
        }
    }
    lx.close()?;
    if lx.peek().is_some() {
        return Err(PlannerError::mismatch(
            lx.line(),
            "trailing content after the histories section",
        ));
    }

    let mut tree = BeliefTree::from_parts(
        restorer.beliefs,
        restorer.actions,
        root,
        tree_next_id,
        threshold,
    );
    for (belief, seq, index) in registrations {
        tree.register_particle(belief, seq, index);
    }

    validate_counters(&tree, &histories)?;
    Ok((pool, tree, histories))
}

/// Attach the current line to a model-side parse failure.
fn self_describe<T>(lx: &mut Lexer, parsed: Result<T>) -> Result<T> {
    parsed.map_err(|e| PlannerError::mismatch(lx.line(), e.to_string()))
}

fn parse_belief<M: Model>(
    lx: &mut Lexer,
    restorer: &mut Restorer<'_, M>,
    parent: Option<ActionNodeId>,
    depth: usize,
) -> Result<BeliefId> {
    lx.expect_word("belief")?;
    let id = lx.u64_()?;
    lx.expect_word("depth")?;
    let stored_depth = lx.usize_()?;
    if stored_depth != depth {
        return Err(PlannerError::mismatch(
            lx.line(),
            format!("belief {id} at depth {stored_depth}, expected {depth}"),
        ));
    }
    lx.expect_word("start")?;
    let n_starting = lx.i64_()?;
    lx.expect_word("end")?;
    let n_ending = lx.i64_()?;
    lx.expect_word("value")?;
    let value = lx.f64_()?;
    lx.open()?;

    if restorer.by_id.contains_key(&id) {
        return Err(PlannerError::mismatch(
            lx.line(),
            format!("duplicate belief id {id}"),
        ));
    }

    // Insert the node with an empty mapping shell first: child action
    // nodes need this belief's arena id for their parent link.
    let (action_map, declared_visits) = parse_action_map_header(lx, restorer.model)?;
    let mut node = BeliefNode::new(id, depth, parent, value, action_map);
    node.n_starting = n_starting;
    node.n_ending = n_ending;
    let belief = BeliefId(restorer.beliefs.insert(node));
    restorer.by_id.insert(id, belief);
    restorer.next_id = restorer.next_id.max(id + 1);

    parse_action_entries(lx, restorer, belief, depth)?;
    let actual = restorer
        .beliefs
        .get(belief.0)
        .expect("just inserted")
        .action_map
        .total_visit_count();
    if actual != declared_visits {
        return Err(PlannerError::mismatch(
            lx.line(),
            format!("belief {id}: declared visit total {declared_visits}, entries sum to {actual}"),
        ));
    }

    lx.close()?;
    Ok(belief)
}

/// Parse an action-map header up to and including its opening brace,
/// returning the empty mapping it describes plus the visit total the
/// header declares (validated against the restored entries).
fn parse_action_map_header<M: Model>(
    lx: &mut Lexer,
    model: &M,
) -> Result<(ActionMapping<M>, i64)> {
    lx.expect_word("actmap")?;
    match lx.word()?.as_str() {
        "discretized" => {
            lx.expect_word("bins")?;
            let bins = lx.usize_()?;
            lx.expect_word("visits")?;
            let visits = lx.i64_()?;
            lx.expect_word("queue")?;
            let queue = lx.usize_list()?;
            lx.open()?;
            Ok((
                ActionMapping::Discretized(DiscretizedActionMap::new(bins, queue)?),
                visits,
            ))
        }
        "continuous" => {
            lx.expect_word("visits")?;
            let visits = lx.i64_()?;
            lx.expect_word("chooser")?;
            let tag = lx.string()?;
            lx.expect_word("state")?;
            let state = lx.string()?;
            lx.expect_word("fixedqueue")?;
            match lx.next()? {
                Tok::LBracket => {}
                other => {
                    return Err(PlannerError::mismatch(
                        lx.line(),
                        format!("expected '[', found {other:?}"),
                    ))
                }
            }
            let mut fixed = Vec::new();
            loop {
                match lx.next()? {
                    Tok::RBracket => break,
                    Tok::Word(w) if w == "vec" => fixed.push(lx.f64_list()?),
                    other => {
                        return Err(PlannerError::mismatch(
                            lx.line(),
                            format!("expected 'vec' or ']', found {other:?}"),
                        ))
                    }
                }
            }
            lx.open()?;
            let chooser = self_describe(lx, model.restore_chooser(&tag, &state))?;
            Ok((
                ActionMapping::Continuous(ContinuousActionMap::from_parts(fixed, chooser)),
                visits,
            ))
        }
        other => Err(PlannerError::mismatch(
            lx.line(),
            format!("unknown action map kind {other:?}"),
        )),
    }
}

/// Parse the entries of an action map (whose opening brace has been
/// consumed), including the map's closing brace.
fn parse_action_entries<M: Model>(
    lx: &mut Lexer,
    restorer: &mut Restorer<'_, M>,
    belief: BeliefId,
    depth: usize,
) -> Result<()> {
    let model = restorer.model;
    while matches!(lx.peek(), Some(Tok::Word(w)) if w == "entry") {
        lx.expect_word("entry")?;
        enum Key {
            Bin(usize, String),
            Vec(Vec<f64>),
        }
        let key = match lx.word()?.as_str() {
            "bin" => {
                let bin = lx.usize_()?;
                lx.expect_word("action")?;
                let action_text = lx.string()?;
                Key::Bin(bin, action_text)
            }
            "vec" => Key::Vec(lx.f64_list()?),
            other => {
                return Err(PlannerError::mismatch(
                    lx.line(),
                    format!("expected 'bin' or 'vec', found {other:?}"),
                ))
            }
        };
        lx.expect_word("legal")?;
        let legal = lx.bool_()?;
        lx.expect_word("visits")?;
        let visits = lx.i64_()?;
        lx.expect_word("q")?;
        let total_q = lx.f64_()?;
        lx.open()?;

        let child = if matches!(lx.peek(), Some(Tok::Word(w)) if w == "actnode") {
            Some(parse_action_node(lx, restorer, belief, depth)?)
        } else {
            None
        };
        lx.close()?;

        match key {
            Key::Bin(bin, action_text) => {
                let action = self_describe(lx, model.parse_action(&action_text))?;
                match &mut restorer
                    .beliefs
                    .get_mut(belief.0)
                    .expect("belief inserted before its entries")
                    .action_map
                {
                    ActionMapping::Discretized(disc) => {
                        disc.restore_entry(bin, action, legal, visits, total_q, child)?;
                    }
                    ActionMapping::Continuous(_) => {
                        return Err(PlannerError::mismatch(
                            lx.line(),
                            "bin entry inside a continuous action map",
                        ))
                    }
                }
            }
            Key::Vec(vector) => {
                match &mut restorer
                    .beliefs
                    .get_mut(belief.0)
                    .expect("belief inserted before its entries")
                    .action_map
                {
                    ActionMapping::Continuous(cont) => {
                        cont.restore_entry(model, vector, legal, visits, total_q, child)?;
                    }
                    ActionMapping::Discretized(_) => {
                        return Err(PlannerError::mismatch(
                            lx.line(),
                            "vector entry inside a discretized action map",
                        ))
                    }
                }
            }
        }
    }
    // Close brace of the action map itself.
    lx.close()?;
    Ok(())
}

fn parse_action_node<M: Model>(
    lx: &mut Lexer,
    restorer: &mut Restorer<'_, M>,
    parent: BeliefId,
    depth: usize,
) -> Result<ActionNodeId> {
    lx.expect_word("actnode")?;
    lx.expect_word("particles")?;
    let n_particles = lx.i64_()?;
    lx.expect_word("q")?;
    let total_q = lx.f64_()?;
    lx.open()?;

    lx.expect_word("obsmap")?;
    let kind = lx.word()?;
    let obs_map = match kind.as_str() {
        "discrete" => {
            if restorer.model.observation_space() != ObservationSpace::Exact {
                return Err(PlannerError::mismatch(
                    lx.line(),
                    "dump has a discrete observation map but the model space is approximate",
                ));
            }
            ObservationMapping::Discrete(DiscreteObservationMap::new())
        }
        "approximate" => {
            lx.expect_word("tau")?;
            let tau = lx.f64_()?;
            ObservationMapping::Approximate(ApproximateObservationMap::new(tau))
        }
        other => {
            return Err(PlannerError::mismatch(
                lx.line(),
                format!("unknown observation map kind {other:?}"),
            ))
        }
    };
    lx.expect_word("visits")?;
    let declared_visits = lx.i64_()?;
    lx.open()?;

    let mut node = ActionNode::new(parent, obs_map);
    node.n_particles = n_particles;
    node.total_q = total_q;
    node.recalculate();
    let action_node = ActionNodeId(restorer.actions.insert(node));

    while matches!(lx.peek(), Some(Tok::Word(w)) if w == "obs") {
        lx.expect_word("obs")?;
        let obs_text = lx.string()?;
        let observation = self_describe(lx, restorer.model.parse_observation(&obs_text))?;
        lx.expect_word("visits")?;
        let visits = lx.i64_()?;
        lx.open()?;
        let child = parse_belief(lx, restorer, Some(action_node), depth + 1)?;
        lx.close()?;

        let model = restorer.model;
        let node = restorer
            .actions
            .get_mut(action_node.0)
            .expect("just inserted");
        let routed = node.obs_map.insert_child(model, &observation, child)?;
        if routed != child {
            return Err(PlannerError::mismatch(
                lx.line(),
                "observation entry collides with an earlier one",
            ));
        }
        node.obs_map.update_visit_count(model, &observation, visits)?;
    }
    lx.close()?; // obsmap
    lx.close()?; // actnode

    let actual = restorer
        .actions
        .get(action_node.0)
        .expect("just inserted")
        .obs_map
        .total_visit_count();
    if actual != declared_visits {
        return Err(PlannerError::mismatch(
            lx.line(),
            format!("observation map declared {declared_visits} visits, entries sum to {actual}"),
        ));
    }

    Ok(action_node)
}

fn validate_counters<M: Model>(
    tree: &BeliefTree<M>,
    histories: &Histories<M>,
) -> Result<()> {
    let mut starting: HashMap<BeliefId, i64> = HashMap::new();
    let mut ending: HashMap<BeliefId, i64> = HashMap::new();
    for seq_id in histories.ids() {
        let sequence = histories.get(seq_id);
        *starting.entry(sequence.entries[0].belief).or_default() += 1;
        let last = sequence.entries.last().expect("validated non-empty");
        *ending.entry(last.belief).or_default() += 1;
    }

    for belief in tree.belief_ids() {
        let node = tree.belief(belief);
        let expect_start = starting.get(&belief).copied().unwrap_or(0);
        let expect_end = ending.get(&belief).copied().unwrap_or(0);
        if node.n_starting_sequences() != expect_start || node.n_ending_sequences() != expect_end {
            return Err(PlannerError::mismatch(
                0,
                format!(
                    "belief {}: stored sequence counters ({}, {}) disagree with histories ({expect_start}, {expect_end})",
                    node.id(),
                    node.n_starting_sequences(),
                    node.n_ending_sequences()
                ),
            ));
        }
    }
    Ok(())
}
