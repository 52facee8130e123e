//! Inverted-text index: term postings with positions, per-term document
//! frequencies, and document-length bookkeeping for BM25 ranking.
//!
//! Layout under `S/I/<name>`:
//!
//! ```text
//! T/<term>/<id…>  -> positions (bincode Vec<u32>)
//! D/<term>        -> document frequency (atomic counter)
//! L/<id…>         -> document length in tokens
//! N               -> total documents
//! TL              -> total token count (for average document length)
//! ```
//!
//! The tokenizer is a contract; the default lowercases and splits on
//! non-alphanumeric boundaries.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Lowercased alphanumeric runs.
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(|t| t.to_lowercase()).collect()
    }
}

pub struct TextMaintainer {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for TextMaintainer {
    fn default() -> Self { Self { tokenizer: Arc::new(SimpleTokenizer) } }
}

impl TextMaintainer {
    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self { Self { tokenizer } }

    /// term -> positions for one record version.
    fn term_positions(&self, ctx: &IndexContext<'_>, record: &RecordValues) -> BTreeMap<String, Vec<u32>> {
        let mut terms: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        if let Some(text) = record.get_or_null(&ctx.index.key_paths[0]).as_str() {
            for (position, token) in self.tokenizer.tokenize(text).into_iter().enumerate() {
                terms.entry(token).or_default().push(position as u32);
            }
        }
        terms
    }

    fn posting_key(space: &Subspace, term: &str, id: &[Value]) -> Result<Vec<u8>> {
        let mut elements = vec![Value::from("T"), Value::from(term)];
        elements.extend_from_slice(id);
        space.pack(&elements)
    }

    fn df_key(space: &Subspace, term: &str) -> Result<Vec<u8>> { space.pack(&[Value::from("D"), Value::from(term)]) }

    fn length_key(space: &Subspace, id: &[Value]) -> Result<Vec<u8>> {
        let mut elements = vec![Value::from("L")];
        elements.extend_from_slice(id);
        space.pack(&elements)
    }

    fn doc_count_key(space: &Subspace) -> Result<Vec<u8>> { space.pack_one(&Value::from("N")) }

    fn total_length_key(space: &Subspace) -> Result<Vec<u8>> { space.pack_one(&Value::from("TL")) }
}

#[async_trait]
impl IndexMaintainer for TextMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let space = ctx.index_space()?;
        let old_terms = old.map(|record| self.term_positions(ctx, record)).unwrap_or_default();
        let new_terms = new.map(|record| self.term_positions(ctx, record)).unwrap_or_default();
        if old.is_some() == new.is_some() && old_terms == new_terms {
            return Ok(());
        }

        for (term, _) in old_terms.iter().filter(|(term, _)| !new_terms.contains_key(*term)) {
            ctx.txn.clear(&Self::posting_key(&space, term, id)?)?;
            ctx.txn.atomic_add(&Self::df_key(&space, term)?, -1)?;
        }
        for (term, positions) in &new_terms {
            match old_terms.get(term) {
                Some(previous) if previous == positions => {}
                existing => {
                    ctx.txn.set(&Self::posting_key(&space, term, id)?, &bincode::serialize(positions)?)?;
                    if existing.is_none() {
                        ctx.txn.atomic_add(&Self::df_key(&space, term)?, 1)?;
                    }
                }
            }
        }

        let old_len = old_terms.values().map(|p| p.len() as i64).sum::<i64>();
        let new_len = new_terms.values().map(|p| p.len() as i64).sum::<i64>();
        match (old.is_some(), new.is_some()) {
            (false, true) => ctx.txn.atomic_add(&Self::doc_count_key(&space)?, 1)?,
            (true, false) => {
                ctx.txn.atomic_add(&Self::doc_count_key(&space)?, -1)?;
                ctx.txn.clear(&Self::length_key(&space, id)?)?;
            }
            _ => {}
        }
        if new.is_some() {
            ctx.txn.set(&Self::length_key(&space, id)?, &new_len.to_le_bytes())?;
        }
        if new_len != old_len {
            ctx.txn.atomic_add(&Self::total_length_key(&space)?, new_len - old_len)?;
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        let space = ctx.index_space()?;
        let mut keys = BTreeSet::new();
        for term in self.term_positions(ctx, record).keys() {
            keys.insert(Self::posting_key(&space, term, id)?);
        }
        keys.insert(Self::length_key(&space, id)?);
        Ok(keys)
    }
}

/// Query side of a text index.
pub struct TextReader<'a> {
    txn: &'a Transaction,
    space: Subspace,
    tokenizer: Arc<dyn Tokenizer>,
}

impl<'a> TextReader<'a> {
    pub fn new(txn: &'a Transaction, container: &Subspace, index_name: &str) -> Result<Self> {
        Ok(Self {
            txn,
            space: container.subspace(&[Value::from("I"), Value::from(index_name)])?,
            tokenizer: Arc::new(SimpleTokenizer),
        })
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// id tuple -> positions for one term.
    async fn postings(&self, term: &str) -> Result<BTreeMap<Vec<Value>, Vec<u32>>> {
        let term_space = self.space.subspace(&[Value::from("T"), Value::from(term)])?;
        let (begin, end) = term_space.range();
        let mut out = BTreeMap::new();
        for entry in self.txn.get_range(&begin, &end, RangeOptions::default()).await? {
            out.insert(term_space.unpack(&entry.key)?, bincode::deserialize(&entry.value)?);
        }
        Ok(out)
    }

    async fn document_frequency(&self, term: &str) -> Result<i64> {
        match self.txn.get_snapshot(&TextMaintainer::df_key(&self.space, term)?).await? {
            Some(raw) => raw.try_into().map(i64::from_le_bytes).map_err(|_| Error::corrupt("malformed document frequency")),
            None => Ok(0),
        }
    }

    async fn counter(&self, key: Vec<u8>) -> Result<i64> {
        match self.txn.get_snapshot(&key).await? {
            Some(raw) => raw.try_into().map(i64::from_le_bytes).map_err(|_| Error::corrupt("malformed text counter")),
            None => Ok(0),
        }
    }

    /// Documents containing every query term.
    pub async fn search_and(&self, query: &str) -> Result<Vec<Vec<Value>>> {
        let terms = self.tokenizer.tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut result: Option<BTreeSet<Vec<Value>>> = None;
        for term in &terms {
            let ids: BTreeSet<Vec<Value>> = self.postings(term).await?.into_keys().collect();
            result = Some(match result {
                None => ids,
                Some(current) => current.intersection(&ids).cloned().collect(),
            });
            if result.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }
        Ok(result.unwrap_or_default().into_iter().collect())
    }

    /// Documents containing any query term.
    pub async fn search_or(&self, query: &str) -> Result<Vec<Vec<Value>>> {
        let mut out = BTreeSet::new();
        for term in self.tokenizer.tokenize(query) {
            out.extend(self.postings(&term).await?.into_keys());
        }
        Ok(out.into_iter().collect())
    }

    /// Documents containing the query terms as consecutive positions.
    pub async fn search_phrase(&self, phrase: &str) -> Result<Vec<Vec<Value>>> {
        let terms = self.tokenizer.tokenize(phrase);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut per_term = Vec::with_capacity(terms.len());
        for term in &terms {
            per_term.push(self.postings(term).await?);
        }

        let mut out = Vec::new();
        'candidates: for (id, first_positions) in &per_term[0] {
            'starts: for &start in first_positions {
                for (offset, postings) in per_term.iter().enumerate().skip(1) {
                    match postings.get(id) {
                        Some(positions) if positions.contains(&(start + offset as u32)) => {}
                        _ => continue 'starts,
                    }
                }
                out.push(id.clone());
                continue 'candidates;
            }
        }
        Ok(out)
    }

    /// BM25-ranked search over the OR of the query terms; returns up to
    /// `limit` `(score, id)` pairs, best first.
    pub async fn bm25(&self, query: &str, limit: usize) -> Result<Vec<(f64, Vec<Value>)>> {
        const K1: f64 = 1.2;
        const B: f64 = 0.75;

        let total_docs = self.counter(TextMaintainer::doc_count_key(&self.space)?).await?;
        if total_docs == 0 {
            return Ok(Vec::new());
        }
        let total_length = self.counter(TextMaintainer::total_length_key(&self.space)?).await?;
        let avgdl = (total_length as f64 / total_docs as f64).max(1.0);

        let mut scores: HashMap<Vec<Value>, f64> = HashMap::new();
        let mut lengths: HashMap<Vec<Value>, f64> = HashMap::new();
        for term in self.tokenizer.tokenize(query) {
            let df = self.document_frequency(&term).await?;
            if df == 0 {
                continue;
            }
            let idf = (((total_docs - df) as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            for (id, positions) in self.postings(&term).await? {
                let dl = match lengths.get(&id) {
                    Some(dl) => *dl,
                    None => {
                        let dl = self.counter(TextMaintainer::length_key(&self.space, &id)?).await? as f64;
                        lengths.insert(id.clone(), dl);
                        dl
                    }
                };
                let tf = positions.len() as f64;
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(f64, Vec<Value>)> = scores.into_iter().map(|(id, score)| (score, id)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.truncate(limit);
        Ok(ranked)
    }
}
