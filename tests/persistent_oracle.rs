//! Randomized workloads for the persistent containers, checked against the
//! standard library's containers as oracles. Sequences are deterministic
//! (seeded LCG) so failures reproduce.

use std::collections::BTreeMap;
use std::thread;

use arbor::btree::Tree;
use arbor::vector::Vector;

/// Small deterministic generator; the constants are the PCG64 defaults.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn map_agrees_with_the_standard_ordered_map() {
    let mut lcg = Lcg(0xfeed);
    let mut tree: Tree<u64, u64> = Tree::immutable();
    let mut oracle: BTreeMap<u64, u64> = BTreeMap::new();

    for round in 0..2000 {
        let key = lcg.next() % 256;
        match lcg.next() % 3 {
            0 | 1 => {
                let value = lcg.next();
                tree = tree.with(key, value);
                oracle.insert(key, value);
            }
            _ => {
                tree = tree.with_deleted(&key);
                oracle.remove(&key);
            }
        }
        let probe = lcg.next() % 256;
        assert_eq!(
            tree.find(&probe),
            oracle.get(&probe),
            "probe {probe} diverged in round {round}"
        );
    }
    for (key, value) in &oracle {
        assert_eq!(tree.find(key), Some(value));
    }
}

#[test]
fn map_with_small_degree_agrees_too() {
    // degree 3 keeps nodes tiny, forcing splits, rotations and merges early
    let mut lcg = Lcg(0xbeef);
    let mut tree: Tree<u64, u64> = Tree::immutable_with_degree(3);
    let mut oracle: BTreeMap<u64, u64> = BTreeMap::new();

    for _ in 0..1500 {
        let key = lcg.next() % 64;
        if lcg.next() % 2 == 0 {
            tree = tree.with(key, key);
            oracle.insert(key, key);
        } else {
            tree = tree.with_deleted(&key);
            oracle.remove(&key);
        }
    }
    for key in 0..64 {
        assert_eq!(tree.find(&key), oracle.get(&key), "key {key}");
    }
}

#[test]
fn vector_agrees_with_the_standard_vec() {
    let mut lcg = Lcg(0xcafe);
    let mut vector: Vector<u64> = Vector::immutable_with_degree_exponent(2);
    let mut oracle: Vec<u64> = Vec::new();

    for round in 0..2000 {
        match lcg.next() % 4 {
            0 | 1 => {
                let value = lcg.next();
                vector = vector.push(value);
                oracle.push(value);
            }
            2 if !oracle.is_empty() => {
                let i = (lcg.next() as usize) % oracle.len();
                let value = lcg.next();
                vector = vector.set(i, value).unwrap();
                oracle[i] = value;
            }
            _ if !oracle.is_empty() => {
                vector = vector.pop().unwrap();
                oracle.pop();
            }
            _ => {}
        }
        assert_eq!(vector.len(), oracle.len(), "length diverged in round {round}");
        assert_eq!(vector.last(), oracle.last());
        if !oracle.is_empty() {
            let probe = (lcg.next() as usize) % oracle.len();
            assert_eq!(
                vector.get(probe).unwrap(),
                &oracle[probe],
                "probe {probe} diverged in round {round}"
            );
        }
    }
    for (i, value) in oracle.iter().enumerate() {
        assert_eq!(vector.get(i).unwrap(), value);
    }
}

#[test]
fn incarnations_are_freely_shared_across_threads() {
    let mut tree: Tree<u64, u64> = Tree::immutable();
    for k in 0..100 {
        tree = tree.with(k, k * k);
    }
    let mut vector: Vector<u64> = Vector::immutable();
    for x in 0..100 {
        vector = vector.push(x);
    }

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let tree = tree.clone();
        let vector = vector.clone();
        handles.push(thread::spawn(move || {
            // every thread derives its own incarnations...
            let derived = tree.with(1000 + t, t).with_deleted(&t);
            assert_eq!(derived.find(&(1000 + t)), Some(&t));
            assert_eq!(derived.find(&t), None);
            let grown = vector.push(1000 + t);
            assert_eq!(grown.len(), 101);
            // ...while the shared originals stay what they were
            for k in 0..100 {
                assert_eq!(tree.find(&k), Some(&(k * k)));
                assert_eq!(vector.get(k as usize).unwrap(), &k);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tree.find(&0), Some(&0));
    assert_eq!(vector.len(), 100);
}

#[test]
fn every_incarnation_of_a_history_stays_readable() {
    let mut incarnations = vec![Tree::immutable()];
    for k in 0..50 {
        let next = incarnations.last().unwrap().with(k, k.to_string());
        incarnations.push(next);
    }
    for (n, tree) in incarnations.iter().enumerate() {
        for k in 0..50 {
            if k < n as i32 {
                assert_eq!(tree.find(&k), Some(&k.to_string()));
            } else {
                assert_eq!(tree.find(&k), None);
            }
        }
    }
}
