//! Sparse retrieval: a from-scratch Okapi BM25 index over paper
//! title+abstract text, queried either by plain text or by the planner's
//! weighted `query_terms`.

use std::collections::HashMap;

use crate::paper::{Paper, RankedList};
use crate::subscription::PlanQuery;

use super::tokenize::tokenize;

pub const K1: f32 = 1.2;
pub const B: f32 = 0.75;

struct DocStats {
    paper_id: String,
    term_freqs: HashMap<String, usize>,
    len: usize,
}

/// An in-memory BM25 index built once per run over the fetched corpus.
pub struct Bm25Index {
    docs: Vec<DocStats>,
    doc_freqs: HashMap<String, usize>,
    avgdl: f32,
}

impl Bm25Index {
    /// Tokenizes every paper's `title + "\n" + abstract` and builds term/doc
    /// frequency tables.
    pub fn build(papers: &[Paper]) -> Self {
        let mut docs = Vec::with_capacity(papers.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for paper in papers {
            let tokens = tokenize(&paper.bm25_text());
            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for tok in &tokens {
                *term_freqs.entry(tok.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += tokens.len();
            docs.push(DocStats {
                paper_id: paper.id.clone(),
                term_freqs,
                len: tokens.len(),
            });
        }

        let avgdl = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };

        Self { docs, doc_freqs, avgdl }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = *self.doc_freqs.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn term_score(&self, doc: &DocStats, term: &str) -> f32 {
        let freq = *doc.term_freqs.get(term).unwrap_or(&0) as f32;
        if freq == 0.0 {
            return 0.0;
        }
        let denom_avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };
        let tf_part = (freq * (K1 + 1.0)) / (freq + K1 * (1.0 - B + B * (doc.len as f32 / denom_avgdl)));
        self.idf(term) * tf_part
    }

    /// Scores every document against a set of weighted, pre-tokenized terms
    /// and sums the weighted per-term BM25 contributions.
    fn score_weighted(&self, weighted_terms: &[(Vec<String>, f32)]) -> Vec<(String, f32)> {
        self.docs
            .iter()
            .map(|doc| {
                let score: f32 = weighted_terms
                    .iter()
                    .map(|(tokens, weight)| {
                        weight * tokens.iter().map(|t| self.term_score(doc, t)).sum::<f32>()
                    })
                    .sum();
                (doc.paper_id.clone(), score)
            })
            .collect()
    }

    fn matches_boolean(&self, doc: &DocStats, query: &PlanQuery) -> bool {
        for must in &query.must_have {
            let toks = tokenize(must);
            if !toks.iter().any(|t| doc.term_freqs.contains_key(t)) {
                return false;
            }
        }
        for excl in &query.exclude {
            let toks = tokenize(excl);
            if toks.iter().any(|t| doc.term_freqs.contains_key(t)) {
                return false;
            }
        }
        true
    }

    /// Scores a single query against the corpus, honoring `query_terms`
    /// weights when present, falling back to a plain multi-term BM25 over
    /// `query_text` otherwise. A non-empty `boolean_expr` only applies hard
    /// `must_have`/`exclude` filters when `keyword_recall_mode` is
    /// `boolean_mixed` — the caller is responsible for leaving `boolean_expr`
    /// empty otherwise, per the query-plan construction rules.
    pub fn score_query(&self, query: &PlanQuery, keyword_recall_mode: &str) -> Vec<(String, f32)> {
        let apply_boolean = !query.boolean_expr.is_empty() && keyword_recall_mode == "boolean_mixed";

        let weighted_terms: Vec<(Vec<String>, f32)> = if !query.query_terms.is_empty() {
            query
                .query_terms
                .iter()
                .map(|term| (tokenize(&term.text), term.weight))
                .collect()
        } else {
            vec![(tokenize(&query.query_text), 1.0)]
        };

        if !apply_boolean {
            return self.score_weighted(&weighted_terms);
        }

        self.docs
            .iter()
            .filter(|doc| self.matches_boolean(doc, query))
            .map(|doc| {
                let score: f32 = weighted_terms
                    .iter()
                    .map(|(tokens, weight)| {
                        weight * tokens.iter().map(|t| self.term_score(doc, t)).sum::<f32>()
                    })
                    .sum();
                (doc.paper_id.clone(), score)
            })
            .collect()
    }
}

/// Runs BM25 retrieval for a single query and truncates to `top_k`.
pub fn retrieve(index: &Bm25Index, query: &PlanQuery, keyword_recall_mode: &str, top_k: usize) -> RankedList {
    let scored = index.score_query(query, keyword_recall_mode);
    RankedList::from_scores(scored).truncate(top_k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::QueryTerm;
    use chrono::Utc;

    fn paper(id: &str, title: &str, abstract_text: &str) -> Paper {
        Paper {
            id: id.to_string(),
            source: "arxiv".to_string(),
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            authors: vec![],
            primary_category: String::new(),
            categories: vec![],
            published: Utc::now(),
            link: String::new(),
            embedding: None,
            embedding_model: None,
            embedding_dim: None,
        }
    }

    fn plain_query(text: &str) -> PlanQuery {
        PlanQuery {
            query_type: "keyword".to_string(),
            tag: "T".to_string(),
            paper_tag: "keyword:T".to_string(),
            query_text: text.to_string(),
            query_terms: vec![],
            boolean_expr: String::new(),
            logic_cn: String::new(),
            must_have: vec![],
            optional: vec![],
            exclude: vec![],
            source_profile_id: "p".to_string(),
            source_rule_id: None,
            source_query_id: None,
            source: "manual".to_string(),
            or_soft_weight: None,
        }
    }

    #[test]
    fn ranks_matching_doc_above_unrelated_one() {
        let papers = vec![
            paper("p1", "Symbolic Regression for Physics", "We study symbolic regression methods."),
            paper("p2", "Unrelated Topic", "This paper is about cooking recipes."),
        ];
        let index = Bm25Index::build(&papers);
        let query = plain_query("symbolic regression");
        let list = retrieve(&index, &query, "or", 200);
        assert_eq!(list.entries[0].paper_id, "p1");
        assert!(list.entries[0].score > 0.0);
    }

    #[test]
    fn weighted_terms_boost_main_over_related() {
        let papers = vec![
            paper("p1", "Main Term Only", "main term appears here"),
            paper("p2", "Related Term Only", "related term appears here"),
        ];
        let index = Bm25Index::build(&papers);
        let mut q = plain_query("main term");
        q.query_terms = vec![
            QueryTerm { text: "main term".to_string(), weight: 1.0 },
            QueryTerm { text: "related term".to_string(), weight: 0.5 },
        ];
        let list = retrieve(&index, &q, "or", 200);
        let p1_score = list.entries.iter().find(|e| e.paper_id == "p1").unwrap().score;
        let p2_score = list.entries.iter().find(|e| e.paper_id == "p2").unwrap().score;
        assert!(p1_score > p2_score);
    }

    #[test]
    fn boolean_filter_is_inert_outside_boolean_mixed_mode() {
        let papers = vec![paper("p1", "excluded term present", "excluded term present in text")];
        let index = Bm25Index::build(&papers);
        let mut q = plain_query("term");
        q.boolean_expr = "NOT excluded".to_string();
        q.exclude = vec!["excluded".to_string()];
        let list = retrieve(&index, &q, "or", 200);
        assert_eq!(list.entries.len(), 1, "boolean_expr must stay inert outside boolean_mixed");
    }

    #[test]
    fn boolean_filter_applies_in_boolean_mixed_mode() {
        let papers = vec![paper("p1", "excluded term present", "excluded term present in text")];
        let index = Bm25Index::build(&papers);
        let mut q = plain_query("term");
        q.boolean_expr = "NOT excluded".to_string();
        q.exclude = vec!["excluded".to_string()];
        let list = retrieve(&index, &q, "boolean_mixed", 200);
        assert!(list.entries.is_empty());
    }
}
