#![cfg_attr(not(test), deny(missing_docs))]

//! Persistent authenticated red-black search tree.
//!
//! This crate implements an authenticated search structure over an
//! Okasaki-style persistent red-black tree: a balanced binary search tree in
//! which every node caches the cryptographic digests of its two subtrees. A
//! data holder maintains the full tree and publishes only its root digest; a
//! client holding that digest can then check claimed membership and
//! non-membership results without trusting the holder, using the proof
//! object returned alongside every query.
//!
//! The tree is persistent: [`AuthTree::insert`] returns a new tree version
//! and shares every untouched subtree with the previous version through
//! reference counting. Old versions stay valid, cheap to retain, and safe to
//! query, because no operation ever mutates a reachable node.
//!
//! The crate requires `std`: [`Error`] implements [`std::error::Error`]
//! through its `thiserror` derive. The tree itself only needs `alloc`, so
//! an embedded port would come down to swapping the error derive.
//!
//! # Complexity
//!
//! * [`AuthTree::insert`], [`AuthTree::contains`], [`AuthTree::query`] –
//!   `O(log n)` time; insertion allocates only along the root-to-leaf path.
//! * [`AuthTree::root_digest`] – `O(1)` time (digests are cached on each
//!   node).
//! * [`Proof::verify`] – `O(log n)` time, using nothing but the proof and
//!   the trusted root digest; the verifier never sees the full tree.
//!
//! # Examples
//!
//! ```
//! use arbtree::AuthTree;
//!
//! let mut tree = AuthTree::<u64, &str>::new();
//! for (key, name) in [(5, "five"), (3, "three"), (7, "seven")] {
//!     tree = tree.insert(key, name);
//! }
//!
//! // The holder publishes only this digest.
//! let root = tree.root_digest();
//!
//! let (membership, proof) = tree.query(&7);
//! assert!(membership);
//! assert!(proof.verify(&7, &root).is_ok());
//!
//! // Non-membership results carry a checkable proof as well.
//! let (membership, proof) = tree.query(&6);
//! assert!(!membership);
//! assert!(proof.verify(&6, &root).is_ok());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use sha2::digest::Output;
use sha2::{Digest, Sha256};

/// Digest output for the default [`Sha256`] hasher used by [`AuthTree`].
pub type Sha256Digest = Output<Sha256>;

type DigestOf<H> = Output<H>;

type Link<K, V, H> = Option<Arc<Node<K, V, H>>>;

/// Failures reported by tree operations and proof verification.
///
/// A rejected proof is the security-relevant outcome of [`Proof::verify`]
/// and is reported as a value, never a panic. The variants only differ as a
/// diagnostic nicety; every one of them means the proof (or the requested
/// operation) must be rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The proof cannot be reconstructed into a consistent partial tree.
    #[error("malformed proof: {0}")]
    MalformedProof(&'static str),

    /// The reconstructed root digest does not match the trusted digest.
    #[error("root digest does not match the trusted digest")]
    RootDigestMismatch,

    /// Replaying the search over the reconstructed partial tree did not
    /// reproduce the supplied proof.
    #[error("replayed search does not reproduce the proof")]
    ReplayMismatch,

    /// The requested operation is not provided by this structure.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Node color in the red-black scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// A red node; never the root and never the parent of another red node.
    Red,
    /// A black node.
    Black,
}

impl Color {
    #[inline(always)]
    fn tag(self) -> u8 {
        match self {
            Color::Red => b'R',
            Color::Black => b'B',
        }
    }
}

struct Node<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    color: Color,
    key: K,
    value: V,
    payload_digest: DigestOf<H>,
    left: Link<K, V, H>,
    right: Link<K, V, H>,
    left_digest: DigestOf<H>,
    right_digest: DigestOf<H>,
}

impl<K, V, H> Clone for Node<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    fn clone(&self) -> Self {
        Self {
            color: self.color,
            key: self.key.clone(),
            value: self.value.clone(),
            payload_digest: self.payload_digest.clone(),
            left: self.left.clone(),
            right: self.right.clone(),
            left_digest: self.left_digest.clone(),
            right_digest: self.right_digest.clone(),
        }
    }
}

impl<K, V, H> Node<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    fn singleton(color: Color, key: K, value: V) -> Self {
        let payload_digest = hash_payload::<K, V, H>(&key, &value);
        Self {
            color,
            key,
            value,
            payload_digest,
            left: None,
            right: None,
            left_digest: empty_digest::<H>(),
            right_digest: empty_digest::<H>(),
        }
    }

    /// Builds a node carrying `src`'s payload over the given children, with
    /// the cached child digests reset to the empty sentinel. Callers repair
    /// the caches with [`Node::rehash`].
    fn assembled(color: Color, src: &Self, left: Link<K, V, H>, right: Link<K, V, H>) -> Self {
        Self {
            color,
            key: src.key.clone(),
            value: src.value.clone(),
            payload_digest: src.payload_digest.clone(),
            left,
            right,
            left_digest: empty_digest::<H>(),
            right_digest: empty_digest::<H>(),
        }
    }

    fn from_step(step: &ProofStep<K, V, H>, left: Link<K, V, H>, right: Link<K, V, H>) -> Self {
        Self {
            color: step.color,
            key: step.key.clone(),
            value: step.value.clone(),
            payload_digest: hash_payload::<K, V, H>(&step.key, &step.value),
            left,
            right,
            left_digest: step.left_digest.clone(),
            right_digest: step.right_digest.clone(),
        }
    }

    /// Digest of this node, computed from its color, payload digest, and the
    /// cached child digests. Never walks the children.
    #[inline(always)]
    fn digest(&self) -> DigestOf<H> {
        node_digest::<H>(
            self.color,
            &self.payload_digest,
            &self.left_digest,
            &self.right_digest,
        )
    }

    /// Recomputes the cached child digests, but only for children that are
    /// materialized. A cached digest standing in for an absent subtree is
    /// authoritative and must survive, which is what keeps digests valid on
    /// partial trees.
    fn rehash(&mut self) {
        if let Some(left) = &self.left {
            self.left_digest = left.digest();
        }
        if let Some(right) = &self.right {
            self.right_digest = right.digest();
        }
    }

    fn blackened(this: &Arc<Self>) -> Arc<Self> {
        if this.color == Color::Black {
            Arc::clone(this)
        } else {
            let mut copy = (**this).clone();
            copy.color = Color::Black;
            Arc::new(copy)
        }
    }

    fn to_step(&self) -> ProofStep<K, V, H> {
        ProofStep {
            color: self.color,
            key: self.key.clone(),
            value: self.value.clone(),
            left_digest: self.left_digest.clone(),
            right_digest: self.right_digest.clone(),
        }
    }
}

/// Persistent authenticated red-black search tree.
///
/// Keys order the tree through their [`Ord`] implementation; each key
/// carries an opaque associated value that is bound into the node digest.
/// The digest function is pluggable through the `H` type parameter, any
/// [`Digest`] implementation works and [`Sha256`] is the default.
///
/// Insertion never mutates existing nodes: it returns a new tree version
/// that shares all untouched subtrees with its predecessor, so any number of
/// versions may be kept and queried side by side.
///
/// # Examples
///
/// ```
/// use arbtree::AuthTree;
///
/// let before = AuthTree::<u64, ()>::new().insert(1, ()).insert(2, ());
/// let digest_before = before.root_digest();
///
/// // Inserting produces a new version; the old one is untouched.
/// let after = before.insert(3, ());
/// assert_eq!(before.root_digest(), digest_before);
/// assert_ne!(after.root_digest(), digest_before);
/// ```
pub struct AuthTree<K, V, H = Sha256>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    root: Link<K, V, H>,
    len: usize,
}

impl<K, V, H> Clone for AuthTree<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V, H> Default for AuthTree<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> AuthTree<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// Creates an empty tree.
    #[inline(always)]
    pub const fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// Returns the number of distinct keys stored in the tree.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the tree contains no keys.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the root digest of the tree.
    ///
    /// This is the only thing a data holder needs to publish for queries
    /// against this version to be verifiable. The empty tree has the fixed
    /// [`empty_digest`].
    #[inline(always)]
    pub fn root_digest(&self) -> DigestOf<H> {
        link_digest(&self.root)
    }

    /// Inserts a key and its associated value, returning the new tree
    /// version.
    ///
    /// Inserting a key that is already present is a no-op: the returned
    /// version is structurally identical to `self` and the stored value is
    /// not replaced. The returned root is always black with fresh cached
    /// digests, so [`AuthTree::root_digest`] is coherent immediately.
    pub fn insert(&self, key: K, value: V) -> Self {
        let (root, inserted) = Self::ins(&self.root, &key, &value);
        let root = root.map(|node| {
            if node.color == Color::Black {
                node
            } else {
                let mut blackened = (*node).clone();
                blackened.color = Color::Black;
                blackened.rehash();
                Arc::new(blackened)
            }
        });
        Self {
            root,
            len: self.len + usize::from(inserted),
        }
    }

    /// Deletion is not provided by this structure.
    ///
    /// Always fails with [`Error::Unsupported`]; it never silently no-ops.
    /// An authenticated red-black deletion needs its own fixup procedure and
    /// is independent design work.
    pub fn remove(&self, _key: &K) -> Result<Self, Error> {
        Err(Error::Unsupported("remove"))
    }

    /// Returns `true` if `key` is present.
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns a reference to the value stored for `key`, if present.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut cursor = self.root.as_deref();
        let mut landing = None;
        while let Some(node) = cursor {
            landing = Some(node);
            cursor = if *key <= node.key {
                node.left.as_deref()
            } else {
                node.right.as_deref()
            };
        }
        landing.filter(|node| node.key == *key).map(|node| &node.value)
    }

    /// Walks from the root towards `key`, lazily yielding one proof step per
    /// visited node.
    ///
    /// The sequence is finite and empty exactly when the tree is empty.
    /// Collected in order, the steps form the [`Proof`] for a query on `key`
    /// against this tree version.
    #[inline]
    pub fn search<'a>(&'a self, key: &'a K) -> Search<'a, K, V, H> {
        Search {
            key,
            cursor: self.root.as_deref(),
        }
    }

    /// Answers a membership query, returning the result together with the
    /// proof that lets a digest-only client check it.
    ///
    /// Membership holds exactly when the search's landing step carries the
    /// queried key; the empty tree yields `false` with an empty proof.
    pub fn query(&self, key: &K) -> (bool, Proof<K, V, H>) {
        let steps: Vec<ProofStep<K, V, H>> = self.search(key).collect();
        let membership = steps.last().is_some_and(|step| step.key == *key);
        (membership, Proof { steps })
    }

    fn ins(link: &Link<K, V, H>, key: &K, value: &V) -> (Link<K, V, H>, bool) {
        let arc = match link {
            None => {
                let singleton = Node::singleton(Color::Black, key.clone(), value.clone());
                return (Some(Arc::new(singleton)), true);
            }
            Some(arc) => arc,
        };
        let node = arc.as_ref();

        match key.cmp(&node.key) {
            Ordering::Equal => (Some(Arc::clone(arc)), false),
            Ordering::Less if node.left.is_none() => {
                // First empty slot on the descent: the new key lands as a
                // fresh black singleton on the near side, the former node is
                // blackened onto the far side, and a red parent carrying the
                // smaller key's payload adopts both.
                let (near, _) = Self::ins(&node.left, key, value);
                let mut wrapper = Node {
                    color: Color::Red,
                    key: key.clone(),
                    value: value.clone(),
                    payload_digest: hash_payload::<K, V, H>(key, value),
                    left: near,
                    right: Some(Node::blackened(arc)),
                    left_digest: empty_digest::<H>(),
                    right_digest: empty_digest::<H>(),
                };
                wrapper.rehash();
                (Some(Self::balance(wrapper)), true)
            }
            Ordering::Greater if node.right.is_none() => {
                let (near, _) = Self::ins(&node.right, key, value);
                let mut wrapper =
                    Node::assembled(Color::Red, node, Some(Node::blackened(arc)), near);
                wrapper.rehash();
                (Some(Self::balance(wrapper)), true)
            }
            Ordering::Less => {
                let (left, inserted) = Self::ins(&node.left, key, value);
                let mut rebuilt = node.clone();
                rebuilt.left = left;
                (Some(Self::balance(rebuilt)), inserted)
            }
            Ordering::Greater => {
                let (right, inserted) = Self::ins(&node.right, key, value);
                let mut rebuilt = node.clone();
                rebuilt.right = right;
                (Some(Self::balance(rebuilt)), inserted)
            }
        }
    }

    /// Rewrites a local red-red violation into the canonical balanced shape.
    ///
    /// The four violation shapes only arise under a black parent and are
    /// mutually exclusive; they are still checked in a fixed order so the
    /// first match wins deterministically. A node matching no shape is
    /// returned with its cached digests repaired and its structure intact.
    fn balance(mut node: Node<K, V, H>) -> Arc<Node<K, V, H>> {
        if node.color == Color::Black {
            if let Some(balanced) = Self::match_left_left(&node)
                .or_else(|| Self::match_left_right(&node))
                .or_else(|| Self::match_right_left(&node))
                .or_else(|| Self::match_right_right(&node))
            {
                return Arc::new(balanced);
            }
        }
        node.rehash();
        Arc::new(node)
    }

    fn match_left_left(node: &Node<K, V, H>) -> Option<Node<K, V, H>> {
        let left = red_child(&node.left)?;
        let ll = red_child(&left.left)?;
        Some(Self::rebuild_balanced(
            ll,
            &ll.left,
            &ll.right,
            left,
            &left.right,
            node,
            &node.right,
        ))
    }

    fn match_left_right(node: &Node<K, V, H>) -> Option<Node<K, V, H>> {
        let left = red_child(&node.left)?;
        let lr = red_child(&left.right)?;
        Some(Self::rebuild_balanced(
            left,
            &left.left,
            &lr.left,
            lr,
            &lr.right,
            node,
            &node.right,
        ))
    }

    fn match_right_left(node: &Node<K, V, H>) -> Option<Node<K, V, H>> {
        let right = red_child(&node.right)?;
        let rl = red_child(&right.left)?;
        Some(Self::rebuild_balanced(
            node,
            &node.left,
            &rl.left,
            rl,
            &rl.right,
            right,
            &right.right,
        ))
    }

    fn match_right_right(node: &Node<K, V, H>) -> Option<Node<K, V, H>> {
        let right = red_child(&node.right)?;
        let rr = red_child(&right.right)?;
        Some(Self::rebuild_balanced(
            node,
            &node.left,
            &right.left,
            right,
            &rr.left,
            rr,
            &rr.right,
        ))
    }

    /// The single canonical rewrite shared by all four shapes: three nodes
    /// holding keys `x < y < z` and four subtrees `a..d` become a red `y`
    /// over black `x(a, b)` and black `z(c, d)`, digests repaired bottom-up.
    fn rebuild_balanced(
        x: &Node<K, V, H>,
        a: &Link<K, V, H>,
        b: &Link<K, V, H>,
        y: &Node<K, V, H>,
        c: &Link<K, V, H>,
        z: &Node<K, V, H>,
        d: &Link<K, V, H>,
    ) -> Node<K, V, H> {
        let mut new_left = Node::assembled(Color::Black, x, a.clone(), b.clone());
        new_left.rehash();
        let mut new_right = Node::assembled(Color::Black, z, c.clone(), d.clone());
        new_right.rehash();
        let mut root = Node::assembled(
            Color::Red,
            y,
            Some(Arc::new(new_left)),
            Some(Arc::new(new_right)),
        );
        root.rehash();
        root
    }
}

/// Lazy root-to-landing-point walk yielding one [`ProofStep`] per visited
/// node.
///
/// Produced by [`AuthTree::search`] and [`PartialTree::search`]. The walk
/// descends left when the query key is less than or equal to the node key,
/// and stops at the first empty slot.
pub struct Search<'a, K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    key: &'a K,
    cursor: Option<&'a Node<K, V, H>>,
}

impl<'a, K, V, H> Iterator for Search<'a, K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    type Item = ProofStep<K, V, H>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        let step = node.to_step();
        self.cursor = if *self.key <= node.key {
            node.left.as_deref()
        } else {
            node.right.as_deref()
        };
        Some(step)
    }
}

/// Summary of a single visited node: its color, payload, and both cached
/// child digests.
#[derive(Clone)]
pub struct ProofStep<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// Color of the visited node.
    pub color: Color,
    /// Key of the visited node.
    pub key: K,
    /// Value stored at the visited node.
    pub value: V,
    /// Cached digest of the node's left subtree.
    pub left_digest: DigestOf<H>,
    /// Cached digest of the node's right subtree.
    pub right_digest: DigestOf<H>,
}

impl<K, V, H> ProofStep<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// Digest of the node this step summarizes, recomputed from the step's
    /// own fields.
    pub fn digest(&self) -> DigestOf<H> {
        node_digest::<H>(
            self.color,
            &hash_payload::<K, V, H>(&self.key, &self.value),
            &self.left_digest,
            &self.right_digest,
        )
    }
}

impl<K, V, H> PartialEq for ProofStep<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash + PartialEq,
    H: Digest + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.color == other.color
            && self.key == other.key
            && self.value == other.value
            && self.left_digest == other.left_digest
            && self.right_digest == other.right_digest
    }
}

impl<K, V, H> fmt::Debug for ProofStep<K, V, H>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Hash + fmt::Debug,
    H: Digest + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofStep")
            .field("color", &self.color)
            .field("key", &self.key)
            .field("value", &self.value)
            .field("left_digest", &hex::encode(&self.left_digest))
            .field("right_digest", &hex::encode(&self.right_digest))
            .finish()
    }
}

/// Ordered sequence of proof steps from the root to a search's landing
/// point, root first.
///
/// A proof is transient: it is produced per query, shipped to the verifier,
/// and checked with [`Proof::verify`] against a trusted root digest. Any
/// wire encoding must preserve step order and exact field values, because
/// reconstruction is sensitive to both.
#[derive(Clone)]
pub struct Proof<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// The visited-node summaries in visitation order.
    pub steps: Vec<ProofStep<K, V, H>>,
}

impl<K, V, H> Proof<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// Rebuilds the partial tree (spine) this proof describes.
    ///
    /// The steps are folded leaf-first. The final step must be a landing
    /// leaf whose cached child digests are both the empty sentinel; every
    /// earlier step must cache exactly the digest of the node built from
    /// the steps after it, on the side chosen by key order. Any violation
    /// rejects the proof as malformed. The fold is a plain loop over the
    /// untrusted step sequence, so an oversized forged proof is rejected
    /// rather than exhausting the call stack.
    pub fn reconstruct(&self) -> Result<PartialTree<K, V, H>, Error> {
        let mut root: Link<K, V, H> = None;
        for step in self.steps.iter().rev() {
            let node = match root {
                None => {
                    let empty = empty_digest::<H>();
                    if step.left_digest != empty || step.right_digest != empty {
                        return Err(Error::MalformedProof(
                            "landing step carries non-empty child digests",
                        ));
                    }
                    Node::from_step(step, None, None)
                }
                Some(child) => {
                    if child.key <= step.key {
                        if step.left_digest != child.digest() {
                            return Err(Error::MalformedProof(
                                "cached left digest does not match reconstructed child",
                            ));
                        }
                        Node::from_step(step, Some(child), None)
                    } else {
                        if step.right_digest != child.digest() {
                            return Err(Error::MalformedProof(
                                "cached right digest does not match reconstructed child",
                            ));
                        }
                        Node::from_step(step, None, Some(child))
                    }
                }
            };
            root = Some(Arc::new(node));
        }
        Ok(PartialTree { root })
    }

    /// Verifies this proof for `key` against a trusted root digest.
    ///
    /// The proof is accepted only if the reconstructed partial tree's digest
    /// equals `trusted_root` *and* replaying the search for `key` over that
    /// partial tree reproduces these steps exactly. Either check failing
    /// rejects the proof.
    ///
    /// ```
    /// use arbtree::AuthTree;
    ///
    /// let tree = AuthTree::<u64, ()>::new().insert(1, ()).insert(2, ());
    /// let root = tree.root_digest();
    ///
    /// let (_, proof) = tree.query(&2);
    /// assert!(proof.verify(&2, &root).is_ok());
    /// // A proof for one key does not verify for another.
    /// assert!(proof.verify(&1, &root).is_err());
    /// ```
    pub fn verify(&self, key: &K, trusted_root: &DigestOf<H>) -> Result<(), Error>
    where
        V: PartialEq,
    {
        let spine = self.reconstruct()?;
        if spine.root_digest() != *trusted_root {
            return Err(Error::RootDigestMismatch);
        }
        let replayed: Vec<ProofStep<K, V, H>> = spine.search(key).collect();
        if replayed != self.steps {
            return Err(Error::ReplayMismatch);
        }
        Ok(())
    }
}

impl<K, V, H> fmt::Debug for Proof<K, V, H>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Hash + fmt::Debug,
    H: Digest + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proof").field("steps", &self.steps).finish()
    }
}

/// Minimal reconstruction of a single root-to-landing-point path.
///
/// At most one child per level is materialized; the off-path subtree is
/// represented purely by its cached digest. A partial tree is built from a
/// [`Proof`] at verification time, supports only digest computation and
/// search replay, and cannot be mutated.
pub struct PartialTree<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    root: Link<K, V, H>,
}

impl<K, V, H> PartialTree<K, V, H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    /// Returns the digest of the reconstructed root.
    #[inline(always)]
    pub fn root_digest(&self) -> DigestOf<H> {
        link_digest(&self.root)
    }

    /// Replays a search over the partial tree, yielding proof steps exactly
    /// as [`AuthTree::search`] does over the full tree.
    #[inline]
    pub fn search<'a>(&'a self, key: &'a K) -> Search<'a, K, V, H> {
        Search {
            key,
            cursor: self.root.as_deref(),
        }
    }
}

/// The fixed digest of the empty tree.
///
/// This is a sentinel (the all-zero output of `H`), independent of the
/// digest function's behavior on actual input.
#[inline(always)]
pub fn empty_digest<H: Digest>() -> DigestOf<H> {
    Output::<H>::default()
}

#[inline(always)]
fn link_digest<K, V, H>(link: &Link<K, V, H>) -> DigestOf<H>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    link.as_deref()
        .map(Node::digest)
        .unwrap_or_else(empty_digest::<H>)
}

#[inline(always)]
fn red_child<K, V, H>(link: &Link<K, V, H>) -> Option<&Node<K, V, H>>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
    H: Digest + Clone,
{
    link.as_deref().filter(|node| node.color == Color::Red)
}

#[inline(always)]
fn node_digest<H: Digest>(
    color: Color,
    payload_digest: &DigestOf<H>,
    left_digest: &DigestOf<H>,
    right_digest: &DigestOf<H>,
) -> DigestOf<H> {
    let mut hasher = H::new();
    hasher.update([color.tag()]);
    hasher.update(payload_digest);
    hasher.update(left_digest);
    hasher.update(right_digest);
    hasher.finalize()
}

#[inline(always)]
fn hash_payload<K, V, H>(key: &K, value: &V) -> DigestOf<H>
where
    K: Hash,
    V: Hash,
    H: Digest + Clone,
{
    let mut hasher = DigestHasher::<H>::new();
    key.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finalize()
}

/// Bridges [`std::hash::Hash`] payloads into the cryptographic digest.
struct DigestHasher<H>
where
    H: Digest + Clone,
{
    digest: H,
}

impl<H> DigestHasher<H>
where
    H: Digest + Clone,
{
    #[inline(always)]
    fn new() -> Self {
        Self { digest: H::new() }
    }

    #[inline(always)]
    fn finalize(self) -> DigestOf<H> {
        self.digest.finalize()
    }
}

impl<H> Hasher for DigestHasher<H>
where
    H: Digest + Clone,
{
    #[inline(always)]
    fn finish(&self) -> u64 {
        let output = self.digest.clone().finalize();
        let bytes: &[u8] = output.as_ref();
        let mut buf = [0u8; 8];
        let copy_len = buf.len().min(bytes.len());
        buf[..copy_len].copy_from_slice(&bytes[..copy_len]);
        u64::from_be_bytes(buf)
    }

    #[inline(always)]
    fn write(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use sha2::Sha512;

    type Tree = AuthTree<u64, u64>;

    fn tree_of(keys: &[u64]) -> Tree {
        let mut tree = Tree::new();
        for &k in keys {
            tree = tree.insert(k, k * 10);
        }
        tree
    }

    fn node_count(link: &Link<u64, u64, Sha256>) -> usize {
        match link.as_deref() {
            None => 0,
            Some(node) => 1 + node_count(&node.left) + node_count(&node.right),
        }
    }

    fn height(link: &Link<u64, u64, Sha256>) -> usize {
        match link.as_deref() {
            None => 0,
            Some(node) => 1 + height(&node.left).max(height(&node.right)),
        }
    }

    /// No red node has a red child, left keys are `<=` the node key, right
    /// keys are strictly greater, and every cached child digest matches the
    /// digest recomputed from the child's actual content.
    fn assert_invariants(link: &Link<u64, u64, Sha256>, lo: Option<u64>, hi: Option<u64>) {
        let node = match link.as_deref() {
            None => return,
            Some(node) => node,
        };
        if let Some(lo) = lo {
            assert!(node.key > lo, "key {} violates lower bound {}", node.key, lo);
        }
        if let Some(hi) = hi {
            assert!(node.key <= hi, "key {} violates upper bound {}", node.key, hi);
        }
        if node.color == Color::Red {
            for child in [&node.left, &node.right] {
                if let Some(child) = child.as_deref() {
                    assert_eq!(child.color, Color::Black, "red node has a red child");
                }
            }
        }
        assert_eq!(node.left_digest, link_digest(&node.left), "stale left digest");
        assert_eq!(node.right_digest, link_digest(&node.right), "stale right digest");
        assert_invariants(&node.left, lo, Some(node.key));
        assert_invariants(&node.right, Some(node.key), hi);
    }

    fn assert_black_root(tree: &Tree) {
        if let Some(root) = tree.root.as_deref() {
            assert_eq!(root.color, Color::Black, "root must be black");
        }
    }

    #[test]
    fn empty_tree_has_sentinel_digest_and_empty_proof() {
        let tree = Tree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.root_digest(), empty_digest::<Sha256>());
        assert_eq!(tree.search(&1).count(), 0);

        let (membership, proof) = tree.query(&1);
        assert!(!membership);
        assert!(proof.steps.is_empty());
        // An empty proof verifies against the empty-tree digest and nothing
        // else.
        assert!(proof.verify(&1, &empty_digest::<Sha256>()).is_ok());
        let non_empty = tree_of(&[4]).root_digest();
        assert_eq!(proof.verify(&1, &non_empty), Err(Error::RootDigestMismatch));
    }

    #[test]
    fn insert_contains_and_get() {
        let tree = tree_of(&[10, 5, 20]);
        assert_eq!(tree.len(), 3);
        assert!(tree.contains(&10));
        assert!(tree.contains(&5));
        assert!(tree.contains(&20));
        assert!(!tree.contains(&1));
        assert_eq!(tree.get(&20), Some(&200));
        assert_eq!(tree.get(&1), None);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let tree = tree_of(&[3, 1, 4, 1, 5, 9, 2, 6]);
        assert_eq!(tree.len(), 7);
        let digest_before = tree.root_digest();

        let again = tree.insert(4, 40);
        assert_eq!(again.len(), tree.len());
        assert_eq!(again.root_digest(), digest_before);
        // The stored value is not replaced on a duplicate key.
        let clobbered = tree.insert(4, 999);
        assert_eq!(clobbered.get(&4), Some(&40));
        assert_eq!(clobbered.root_digest(), digest_before);
    }

    #[test]
    fn membership_queries_verify_for_every_key() {
        let keys = [8u64, 3, 11, 1, 6, 9, 14, 4, 7, 13, 2];
        let tree = tree_of(&keys);
        let root = tree.root_digest();
        for &k in &keys {
            let (membership, proof) = tree.query(&k);
            assert!(membership, "key {k} should be a member");
            assert_eq!(proof.steps.last().unwrap().key, k);
            proof.verify(&k, &root).unwrap();
        }
    }

    #[test]
    fn non_membership_queries_verify() {
        let tree = tree_of(&[2, 4, 6, 8, 10]);
        let root = tree.root_digest();
        for missing in [0u64, 1, 3, 5, 7, 9, 11, 100] {
            let (membership, proof) = tree.query(&missing);
            assert!(!membership, "key {missing} should be absent");
            assert!(!proof.steps.is_empty());
            proof.verify(&missing, &root).unwrap();
        }
    }

    #[test]
    fn query_scenario_five_three_seven_nine_eleven() {
        let mut tree = Tree::new();
        for k in [5u64, 3, 7, 9, 11] {
            tree = tree.insert(k, k);
        }
        let d0 = tree.root_digest();

        let (membership, proof) = tree.query(&7);
        assert!(membership);
        // Root (key 5), inner node (key 7), landing leaf (key 7).
        assert_eq!(proof.steps.len(), 3);
        assert_eq!(proof.steps[0].key, 5);
        assert_eq!(proof.steps.last().unwrap().key, 7);
        proof.verify(&7, &d0).unwrap();

        // Rewriting the landing key breaks authentication.
        let mut tampered = proof.clone();
        let last = tampered.steps.len() - 1;
        tampered.steps[last].key = 8;
        tampered.steps[last].value = 8;
        // The forged landing node no longer matches its parent's cached
        // digest.
        assert!(matches!(
            tampered.verify(&7, &d0),
            Err(Error::MalformedProof(_)),
        ));
    }

    #[test]
    fn sequential_inserts_stay_balanced_and_order_sensitive() {
        let forward: Vec<u64> = (0..=30).collect();
        let reverse: Vec<u64> = (0..=30).rev().collect();
        let tree_fwd = tree_of(&forward);
        let tree_rev = tree_of(&reverse);

        assert_eq!(tree_fwd.len(), 31);
        assert_eq!(tree_rev.len(), 31);
        // The insertion scheme materializes one extra node per non-root
        // insert, so 31 keys occupy 61 nodes.
        assert_eq!(node_count(&tree_fwd.root), 61);
        // Red-black bound: height <= 2 * log2(node_count + 1).
        assert!(height(&tree_fwd.root) <= 12, "height {}", height(&tree_fwd.root));
        assert!(height(&tree_rev.root) <= 12, "height {}", height(&tree_rev.root));

        // Same key set, different insertion order, different digest.
        assert_ne!(tree_fwd.root_digest(), tree_rev.root_digest());
    }

    #[test]
    fn invariants_hold_across_random_insertion_orders() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..8 {
            let mut keys: Vec<u64> = (0..100).collect();
            keys.shuffle(&mut rng);
            let tree = tree_of(&keys);
            assert_eq!(tree.len(), 100);
            assert_black_root(&tree);
            assert_invariants(&tree.root, None, None);

            let root = tree.root_digest();
            for k in [0u64, 37, 99] {
                let (membership, proof) = tree.query(&k);
                assert!(membership);
                proof.verify(&k, &root).unwrap();
            }
            let (membership, proof) = tree.query(&1_000);
            assert!(!membership);
            proof.verify(&1_000, &root).unwrap();
        }
    }

    #[test]
    fn search_round_trips_through_reconstruction() {
        let tree = tree_of(&[13, 8, 17, 1, 11, 15, 25, 6, 22, 27]);
        for q in [1u64, 11, 27, 0, 12, 99] {
            let steps: Vec<_> = tree.search(&q).collect();
            let proof = Proof { steps: steps.clone() };
            let spine = proof.reconstruct().unwrap();
            let replayed: Vec<_> = spine.search(&q).collect();
            assert_eq!(replayed, steps, "round trip failed for query {q}");
            assert_eq!(spine.root_digest(), tree.root_digest());
        }
    }

    #[test]
    fn any_tampered_field_is_rejected() {
        let tree = tree_of(&[2, 4, 6, 8, 10, 12, 14]);
        let root = tree.root_digest();
        let (_, proof) = tree.query(&8);
        assert!(proof.steps.len() >= 2);
        proof.verify(&8, &root).unwrap();

        for idx in 0..proof.steps.len() {
            let mut tampered = proof.clone();
            tampered.steps[idx].left_digest[0] ^= 0x01;
            assert!(tampered.verify(&8, &root).is_err(), "left digest flip at {idx}");

            let mut tampered = proof.clone();
            tampered.steps[idx].right_digest[0] ^= 0x01;
            assert!(tampered.verify(&8, &root).is_err(), "right digest flip at {idx}");

            let mut tampered = proof.clone();
            tampered.steps[idx].key ^= 0x01;
            assert!(tampered.verify(&8, &root).is_err(), "key flip at {idx}");

            let mut tampered = proof.clone();
            tampered.steps[idx].value ^= 0x01;
            assert!(tampered.verify(&8, &root).is_err(), "value flip at {idx}");

            let mut tampered = proof.clone();
            tampered.steps[idx].color = match tampered.steps[idx].color {
                Color::Red => Color::Black,
                Color::Black => Color::Red,
            };
            assert!(tampered.verify(&8, &root).is_err(), "color flip at {idx}");
        }

        let mut truncated = proof.clone();
        truncated.steps.pop();
        assert!(truncated.verify(&8, &root).is_err());
    }

    #[test]
    fn malformed_landing_step_is_rejected() {
        let tree = tree_of(&[1, 2, 3]);
        let (_, mut proof) = tree.query(&2);
        let last = proof.steps.len() - 1;
        proof.steps[last].left_digest[0] ^= 0xFF;
        assert_eq!(
            proof.reconstruct().err(),
            Some(Error::MalformedProof(
                "landing step carries non-empty child digests",
            )),
        );
    }

    #[test]
    fn oversized_forged_proof_is_rejected() {
        let tree = tree_of(&[1]);
        let (_, proof) = tree.query(&1);
        let step = proof.steps[0].clone();
        // Repeated copies of a landing step cannot chain into a valid
        // spine; reconstruction must reject the proof no matter how long it
        // is, not crash on its length.
        let forged = Proof {
            steps: vec![step; 200_000],
        };
        assert!(matches!(
            forged.reconstruct(),
            Err(Error::MalformedProof(_)),
        ));
    }

    #[test]
    fn proof_for_one_key_rejected_for_another() {
        let tree = tree_of(&[5, 3, 7]);
        let root = tree.root_digest();
        let (_, proof) = tree.query(&3);
        proof.verify(&3, &root).unwrap();
        // The spine itself is genuine, so the rejection comes from the
        // replay check.
        assert_eq!(proof.verify(&7, &root), Err(Error::ReplayMismatch));
    }

    #[test]
    fn old_versions_stay_valid_after_insert() {
        let before = tree_of(&[10, 20, 30]);
        let digest_before = before.root_digest();

        let after = before.insert(25, 250);
        assert_eq!(before.root_digest(), digest_before);
        assert_ne!(after.root_digest(), digest_before);
        assert!(!before.contains(&25));
        assert!(after.contains(&25));

        // Queries against the old version still verify against its digest.
        let (membership, proof) = before.query(&20);
        assert!(membership);
        proof.verify(&20, &digest_before).unwrap();
        let (membership, proof) = before.query(&25);
        assert!(!membership);
        proof.verify(&25, &digest_before).unwrap();
    }

    #[test]
    fn remove_fails_fast() {
        let tree = tree_of(&[1, 2, 3]);
        assert!(matches!(
            tree.remove(&2),
            Err(Error::Unsupported("remove")),
        ));
        // The failed call changed nothing.
        assert!(tree.contains(&2));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn values_are_bound_into_the_digest() {
        let mut plain = AuthTree::<u64, &str>::new();
        let mut renamed = AuthTree::<u64, &str>::new();
        for k in [1u64, 2, 3] {
            plain = plain.insert(k, "a");
            renamed = renamed.insert(k, "b");
        }
        assert_ne!(plain.root_digest(), renamed.root_digest());
    }

    #[test]
    fn works_with_alternative_digest() {
        let mut tree = AuthTree::<u64, u64, Sha512>::new();
        for k in [9u64, 4, 12, 1, 7] {
            tree = tree.insert(k, k);
        }
        let root = tree.root_digest();
        let (membership, proof) = tree.query(&7);
        assert!(membership);
        proof.verify(&7, &root).unwrap();
        let (membership, proof) = tree.query(&5);
        assert!(!membership);
        proof.verify(&5, &root).unwrap();
    }

    #[test]
    fn search_walk_is_bounded_by_height() {
        let tree = tree_of(&[16, 8, 24, 4, 12, 20, 28]);
        let mut walk = tree.search(&12);
        let first = walk.next().unwrap();
        assert_eq!(first.key, tree.root.as_deref().unwrap().key);
        assert!(walk.count() < height(&tree.root));
    }

    #[test]
    fn step_digest_matches_node_digest() {
        let tree = tree_of(&[5, 3, 7]);
        let steps: Vec<_> = tree.search(&5).collect();
        assert_eq!(steps[0].digest(), tree.root_digest());
    }
}
