//! Closeable, pull-based streams and the combinators built on them.
//!
//! Every stage of a query (summary scan, block aggregation, line
//! flattening, bounding, dedup) is a [`CloseableIterator`]: a plain
//! `Iterator` that can additionally be told to release whatever it holds
//! (open readers, pooled connections, decompressor state) before it is
//! exhausted. `close()` propagates to the wrapped stage, so closing the
//! outermost stream releases the whole chain.
//!
//! Dropping a stream releases its resources as well; `close()` exists so
//! callers can release early while keeping the value around.
//!
//! Combinators (see [`CloseableExt`]):
//!
//! - `bound_by(pred)` -- yield while `pred` holds, then close upstream
//! - `skip_until(pred)` -- drop leading items until `pred` holds
//! - `parse_while(f)` -- map items, stopping at the first `None`
//! - `buffer_cap(n)` -- eagerly drain up to `n` items, close upstream
//! - `dedup_runs(key)` -- keep the first item of each run of equal keys
//! - `best_of_runs(key, score)` -- keep the lowest-scoring item per run

use std::collections::VecDeque;
use std::marker::PhantomData;

/// An iterator that owns releasable resources.
pub trait CloseableIterator: Iterator {
    /// Release held resources. After `close()`, `next()` returns `None`.
    ///
    /// Must be idempotent and must never panic.
    fn close(&mut self);
}

impl<I: CloseableIterator + ?Sized> CloseableIterator for Box<I> {
    fn close(&mut self) {
        (**self).close()
    }
}

/// Type-erased line stream used at module boundaries.
pub type BoxedStream<T> = Box<dyn CloseableIterator<Item = T> + Send>;

// ── Sources ────────────────────────────────────────────────────────

/// Adapter turning any iterator into a closeable one.
pub struct Plain<I> {
    inner: Option<I>,
}

/// Wrap an ordinary iterator (e.g. a `Vec`'s) as a closeable stream.
pub fn closeable<I: IntoIterator>(iter: I) -> Plain<I::IntoIter> {
    Plain {
        inner: Some(iter.into_iter()),
    }
}

impl<I: Iterator> Iterator for Plain<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut()?.next()
    }
}

impl<I: Iterator> CloseableIterator for Plain<I> {
    fn close(&mut self) {
        self.inner = None;
    }
}

/// A stream that is exhausted from the start.
pub struct Empty<T>(PhantomData<fn() -> T>);

pub fn empty<T>() -> Empty<T> {
    Empty(PhantomData)
}

impl<T> Iterator for Empty<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        None
    }
}

impl<T> CloseableIterator for Empty<T> {
    fn close(&mut self) {}
}

// ── Bound ──────────────────────────────────────────────────────────

/// Yields items while a predicate holds; closes upstream on the first miss.
pub struct BoundBy<I, P> {
    inner: I,
    pred: P,
    done: bool,
}

impl<I, P> Iterator for BoundBy<I, P>
where
    I: CloseableIterator,
    P: FnMut(&I::Item) -> bool,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(item) if (self.pred)(&item) => Some(item),
            Some(_) => {
                self.done = true;
                self.inner.close();
                None
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl<I, P> CloseableIterator for BoundBy<I, P>
where
    I: CloseableIterator,
    P: FnMut(&I::Item) -> bool,
{
    fn close(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

// ── Skip ───────────────────────────────────────────────────────────

/// Drops leading items until a predicate first holds, then passes through.
pub struct SkipUntil<I, P> {
    inner: I,
    pred: P,
    started: bool,
}

impl<I, P> Iterator for SkipUntil<I, P>
where
    I: CloseableIterator,
    P: FnMut(&I::Item) -> bool,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            return self.inner.next();
        }
        loop {
            let item = self.inner.next()?;
            if (self.pred)(&item) {
                self.started = true;
                return Some(item);
            }
        }
    }
}

impl<I, P> CloseableIterator for SkipUntil<I, P>
where
    I: CloseableIterator,
    P: FnMut(&I::Item) -> bool,
{
    fn close(&mut self) {
        self.inner.close();
    }
}

// ── Parse ──────────────────────────────────────────────────────────

/// Maps items, terminating the stream (and closing upstream) at the first
/// item the mapping rejects.
pub struct ParseWhile<I, F> {
    inner: I,
    f: F,
    done: bool,
}

impl<I, F, U> Iterator for ParseWhile<I, F>
where
    I: CloseableIterator,
    F: FnMut(I::Item) -> Option<U>,
{
    type Item = U;

    fn next(&mut self) -> Option<U> {
        if self.done {
            return None;
        }
        let mapped = self.inner.next().and_then(&mut self.f);
        if mapped.is_none() {
            self.done = true;
            self.inner.close();
        }
        mapped
    }
}

impl<I, F, U> CloseableIterator for ParseWhile<I, F>
where
    I: CloseableIterator,
    F: FnMut(I::Item) -> Option<U>,
{
    fn close(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

// ── Buffer Cap ─────────────────────────────────────────────────────

/// Drains at most `cap` items from upstream on first access, closes the
/// upstream, and serves the rest from memory.
pub struct BufferCap<I: Iterator> {
    inner: Option<I>,
    cap: usize,
    buffer: VecDeque<I::Item>,
}

impl<I: CloseableIterator> BufferCap<I> {
    fn fill(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            while self.buffer.len() < self.cap {
                match inner.next() {
                    Some(item) => self.buffer.push_back(item),
                    None => break,
                }
            }
            inner.close();
        }
    }
}

impl<I: CloseableIterator> Iterator for BufferCap<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.fill();
        self.buffer.pop_front()
    }
}

impl<I: CloseableIterator> CloseableIterator for BufferCap<I> {
    fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
        self.buffer.clear();
    }
}

// ── Run Dedup ──────────────────────────────────────────────────────

/// Keeps only the first item of each run of consecutive equal keys.
///
/// Reads one item ahead: an item is emitted once the following item's key
/// differs (or upstream ends).
pub struct DedupRuns<I: Iterator, K, F> {
    inner: I,
    key: F,
    pending: Option<(I::Item, K)>,
}

impl<I, K, F> Iterator for DedupRuns<I, K, F>
where
    I: CloseableIterator,
    K: PartialEq,
    F: FnMut(&I::Item) -> K,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let (current, current_key) = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let item = self.inner.next()?;
                let key = (self.key)(&item);
                (item, key)
            }
        };

        while let Some(next) = self.inner.next() {
            let next_key = (self.key)(&next);
            if next_key != current_key {
                self.pending = Some((next, next_key));
                break;
            }
        }
        Some(current)
    }
}

impl<I, K, F> CloseableIterator for DedupRuns<I, K, F>
where
    I: CloseableIterator,
    K: PartialEq,
    F: FnMut(&I::Item) -> K,
{
    fn close(&mut self) {
        self.pending = None;
        self.inner.close();
    }
}

// ── Best Of Runs ───────────────────────────────────────────────────

/// Keeps one item per run of consecutive equal keys: the one with the
/// smallest score. Scanning forward, a later item replaces the current
/// pick when its score is `<=` the pick's, so ties go to the later item.
pub struct BestOfRuns<I: Iterator, K, S, F, G> {
    inner: I,
    key: F,
    score: G,
    pending: Option<(I::Item, K, S)>,
}

impl<I, K, S, F, G> Iterator for BestOfRuns<I, K, S, F, G>
where
    I: CloseableIterator,
    K: PartialEq,
    S: PartialOrd,
    F: FnMut(&I::Item) -> K,
    G: FnMut(&I::Item) -> S,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let (mut best, run_key, mut best_score) = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let item = self.inner.next()?;
                let key = (self.key)(&item);
                let score = (self.score)(&item);
                (item, key, score)
            }
        };

        while let Some(next) = self.inner.next() {
            let next_key = (self.key)(&next);
            let next_score = (self.score)(&next);
            if next_key != run_key {
                self.pending = Some((next, next_key, next_score));
                break;
            }
            if next_score <= best_score {
                best = next;
                best_score = next_score;
            }
        }
        Some(best)
    }
}

impl<I, K, S, F, G> CloseableIterator for BestOfRuns<I, K, S, F, G>
where
    I: CloseableIterator,
    K: PartialEq,
    S: PartialOrd,
    F: FnMut(&I::Item) -> K,
    G: FnMut(&I::Item) -> S,
{
    fn close(&mut self) {
        self.pending = None;
        self.inner.close();
    }
}

// ── Extension Trait ────────────────────────────────────────────────

/// Combinators available on every [`CloseableIterator`].
pub trait CloseableExt: CloseableIterator + Sized {
    fn bound_by<P>(self, pred: P) -> BoundBy<Self, P>
    where
        P: FnMut(&Self::Item) -> bool,
    {
        BoundBy {
            inner: self,
            pred,
            done: false,
        }
    }

    fn skip_until<P>(self, pred: P) -> SkipUntil<Self, P>
    where
        P: FnMut(&Self::Item) -> bool,
    {
        SkipUntil {
            inner: self,
            pred,
            started: false,
        }
    }

    fn parse_while<U, F>(self, f: F) -> ParseWhile<Self, F>
    where
        F: FnMut(Self::Item) -> Option<U>,
    {
        ParseWhile {
            inner: self,
            f,
            done: false,
        }
    }

    fn buffer_cap(self, cap: usize) -> BufferCap<Self> {
        BufferCap {
            inner: Some(self),
            cap,
            buffer: VecDeque::new(),
        }
    }

    fn dedup_runs<K, F>(self, key: F) -> DedupRuns<Self, K, F>
    where
        K: PartialEq,
        F: FnMut(&Self::Item) -> K,
    {
        DedupRuns {
            inner: self,
            key,
            pending: None,
        }
    }

    fn best_of_runs<K, S, F, G>(self, key: F, score: G) -> BestOfRuns<Self, K, S, F, G>
    where
        K: PartialEq,
        S: PartialOrd,
        F: FnMut(&Self::Item) -> K,
        G: FnMut(&Self::Item) -> S,
    {
        BestOfRuns {
            inner: self,
            key,
            score,
            pending: None,
        }
    }

    fn boxed(self) -> BoxedStream<Self::Item>
    where
        Self: Send + 'static,
    {
        Box::new(self)
    }
}

impl<I: CloseableIterator> CloseableExt for I {}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Source that counts how many items were pulled and whether it was closed.
    struct Probe {
        items: VecDeque<i32>,
        pulled: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(items: &[i32]) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let pulled = Arc::new(AtomicUsize::new(0));
            let closed = Arc::new(AtomicUsize::new(0));
            let probe = Probe {
                items: items.iter().copied().collect(),
                pulled: Arc::clone(&pulled),
                closed: Arc::clone(&closed),
            };
            (probe, pulled, closed)
        }
    }

    impl Iterator for Probe {
        type Item = i32;
        fn next(&mut self) -> Option<i32> {
            let item = self.items.pop_front()?;
            self.pulled.fetch_add(1, Ordering::SeqCst);
            Some(item)
        }
    }

    impl CloseableIterator for Probe {
        fn close(&mut self) {
            self.items.clear();
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_plain_close_stops_iteration() {
        let mut s = closeable(vec![1, 2, 3]);
        assert_eq!(s.next(), Some(1));
        s.close();
        assert_eq!(s.next(), None);
    }

    #[test]
    fn test_bound_by_stops_and_closes_upstream() {
        let (probe, pulled, closed) = Probe::new(&[1, 2, 3, 10, 4, 5]);
        let out: Vec<i32> = probe.bound_by(|x| *x < 5).collect();
        assert_eq!(out, vec![1, 2, 3]);
        // Reads exactly one item past the bound, never more.
        assert_eq!(pulled.load(Ordering::SeqCst), 4);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_skip_until() {
        let out: Vec<i32> = closeable(vec![1, 2, 5, 3, 6])
            .skip_until(|x| *x >= 5)
            .collect();
        // Only leading items are skipped.
        assert_eq!(out, vec![5, 3, 6]);
    }

    #[test]
    fn test_parse_while_terminates_on_reject() {
        let (probe, _, closed) = Probe::new(&[2, 4, 7, 8]);
        let out: Vec<i32> = probe
            .parse_while(|x| if x % 2 == 0 { Some(x * 10) } else { None })
            .collect();
        assert_eq!(out, vec![20, 40]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_cap_drains_then_closes() {
        let (probe, pulled, closed) = Probe::new(&[1, 2, 3, 4, 5]);
        let mut capped = probe.buffer_cap(3);
        assert_eq!(pulled.load(Ordering::SeqCst), 0, "draining is lazy");

        assert_eq!(capped.next(), Some(1));
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let rest: Vec<i32> = capped.collect();
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn test_buffer_cap_larger_than_input() {
        let out: Vec<i32> = closeable(vec![1, 2]).buffer_cap(10).collect();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_dedup_runs_keeps_first() {
        let items = vec![(1, 'a'), (1, 'b'), (2, 'c'), (2, 'd'), (2, 'e'), (3, 'f'), (1, 'g')];
        let out: Vec<char> = closeable(items)
            .dedup_runs(|(k, _)| *k)
            .map(|(_, c)| c)
            .collect();
        assert_eq!(out, vec!['a', 'c', 'f', 'g']);
    }

    #[test]
    fn test_best_of_runs_ties_go_to_later() {
        let items = vec![(1, 5, 'a'), (1, 3, 'b'), (1, 3, 'c'), (1, 4, 'd'), (2, 9, 'e')];
        let out: Vec<char> = closeable(items)
            .best_of_runs(|(k, _, _)| *k, |(_, s, _)| *s)
            .map(|(_, _, c)| c)
            .collect();
        assert_eq!(out, vec!['c', 'e']);
    }

    #[test]
    fn test_close_propagates_through_chain() {
        let (probe, _, closed) = Probe::new(&[1, 2, 3, 4]);
        let mut chain = probe
            .skip_until(|x| *x > 1)
            .dedup_runs(|x| *x)
            .bound_by(|x| *x < 100)
            .boxed();
        assert_eq!(chain.next(), Some(2));
        chain.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(chain.next(), None);
    }

    #[test]
    fn test_empty() {
        let mut e = empty::<String>();
        assert!(e.next().is_none());
        e.close();
    }
}
