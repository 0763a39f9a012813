//! Adaptive Huffman coding used on audio sectors
//!
//! Both sides start from the same tree, built from a fixed weight table, and
//! update it after every symbol, so no code table is ever stored. Bytes not yet
//! in the tree are sent as the escape symbol `0x101` followed by eight raw
//! bits; `0x100` ends the stream. Only compression type 0 is produced. Bits
//! are packed least significant first.

use crate::{Error, Result};

/// Symbol that ends the stream
const SYMBOL_END: usize = 0x100;
/// Symbol announcing a byte that is not in the tree yet
const SYMBOL_NEW: usize = 0x101;
/// Number of symbols, including the two control symbols
const SYMBOL_COUNT: usize = 0x102;

/// Index of the list sentinel in the node arena
const HEAD: usize = 0;

/// Non-zero entries of the weight table for compression type 0
const TYPE0_WEIGHTS: [(usize, u32); 2] = [(0x00, 0x0A), (0xFF, 0x02)];

#[derive(Debug, Clone, Copy)]
struct Node {
    value: usize,
    weight: u32,
    prev: usize,
    next: usize,
    parent: Option<usize>,
    child_lo: Option<usize>,
}

/// Huffman tree whose nodes also form a list ordered by descending weight
///
/// The list starts after [`HEAD`]; its first node is the root. The higher
/// weight child of a node always sits right before its lower weight child.
#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    by_symbol: [Option<usize>; SYMBOL_COUNT],
}

impl Tree {
    fn new() -> Self {
        let head = Node {
            value: 0,
            weight: 0,
            prev: HEAD,
            next: HEAD,
            parent: None,
            child_lo: None,
        };
        let mut tree = Self {
            nodes: Vec::with_capacity(0x203),
            by_symbol: [None; SYMBOL_COUNT],
        };
        tree.nodes.push(head);
        tree.build();
        tree
    }

    fn first(&self) -> usize {
        self.nodes[HEAD].next
    }

    fn last(&self) -> usize {
        self.nodes[HEAD].prev
    }

    fn unlink(&mut self, item: usize) {
        let Node { prev, next, .. } = self.nodes[item];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
    }

    /// Link `item` right after `anchor`
    fn link_after(&mut self, anchor: usize, item: usize) {
        let next = self.nodes[anchor].next;
        self.nodes[item].next = next;
        self.nodes[item].prev = anchor;
        self.nodes[next].prev = item;
        self.nodes[anchor].next = item;
    }

    fn create(&mut self, value: usize, weight: u32, at_front: bool) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            value,
            weight,
            prev: HEAD,
            next: HEAD,
            parent: None,
            child_lo: None,
        });
        let anchor = if at_front { HEAD } else { self.last() };
        self.link_after(anchor, index);
        index
    }

    /// Walk backwards from `start` to the first node weighing at least `weight`
    fn find_higher_or_equal(&self, mut start: usize, weight: u32) -> usize {
        while start != HEAD {
            if self.nodes[start].weight >= weight {
                return start;
            }
            start = self.nodes[start].prev;
        }
        HEAD
    }

    fn fix_position(&mut self, item: usize, max_weight: u32) -> u32 {
        let weight = self.nodes[item].weight;
        if weight < max_weight {
            let higher = self.find_higher_or_equal(self.last(), weight);
            self.unlink(item);
            self.link_after(higher, item);
            max_weight
        } else {
            weight
        }
    }

    fn build(&mut self) {
        let mut max_weight = 0;
        for (symbol, weight) in TYPE0_WEIGHTS {
            let item = self.create(symbol, weight, true);
            self.by_symbol[symbol] = Some(item);
            max_weight = self.fix_position(item, max_weight);
        }

        self.by_symbol[SYMBOL_END] = Some(self.create(SYMBOL_END, 1, false));
        self.by_symbol[SYMBOL_NEW] = Some(self.create(SYMBOL_NEW, 1, false));

        let mut child_lo = self.last();
        while child_lo != HEAD {
            let child_hi = self.nodes[child_lo].prev;
            if child_hi == HEAD {
                break;
            }

            let weight = self.nodes[child_hi].weight + self.nodes[child_lo].weight;
            let parent = self.create(0, weight, true);
            self.nodes[child_lo].parent = Some(parent);
            self.nodes[child_hi].parent = Some(parent);
            self.nodes[parent].child_lo = Some(child_lo);
            max_weight = self.fix_position(parent, max_weight);

            child_lo = self.nodes[child_hi].prev;
        }
    }

    /// Bump the weight of `item` and its ancestors, keeping the list sorted
    fn increment(&mut self, item: usize) {
        let mut current = Some(item);
        while let Some(item) = current {
            self.nodes[item].weight += 1;
            let weight = self.nodes[item].weight;

            let higher = self.find_higher_or_equal(self.nodes[item].prev, weight);
            let swap = self.nodes[higher].next;
            if swap != item {
                self.unlink(swap);
                self.link_after(item, swap);
                self.unlink(item);
                self.link_after(higher, item);

                let item_parent = self.nodes[item].parent;
                let swap_parent = self.nodes[swap].parent;
                let swap_sibling = swap_parent.and_then(|p| self.nodes[p].child_lo);
                if let Some(parent) = item_parent {
                    if self.nodes[parent].child_lo == Some(item) {
                        self.nodes[parent].child_lo = Some(swap);
                    }
                }
                if swap_sibling == Some(swap) {
                    if let Some(parent) = swap_parent {
                        self.nodes[parent].child_lo = Some(item);
                    }
                }
                self.nodes[item].parent = swap_parent;
                self.nodes[swap].parent = item_parent;
            }

            current = self.nodes[item].parent;
        }
    }

    /// Split the lightest leaf into itself and a new zero-weight leaf
    fn insert_symbol(&mut self, symbol: usize) {
        let last = self.last();
        let old_symbol = self.nodes[last].value;
        let weight = self.nodes[last].weight;

        let child_hi = self.create(old_symbol, weight, false);
        self.nodes[child_hi].parent = Some(last);
        self.by_symbol[old_symbol] = Some(child_hi);

        let child_lo = self.create(symbol, 0, false);
        self.nodes[child_lo].parent = Some(last);
        self.nodes[last].child_lo = Some(child_lo);
        self.by_symbol[symbol] = Some(child_lo);

        self.increment(child_lo);
    }

    fn encode(&self, writer: &mut BitWriter, symbol: usize) -> Result<()> {
        let mut item = self.by_symbol[symbol]
            .ok_or_else(|| Error::compression(format!("Huffman symbol {symbol:#x} missing")))?;

        let mut path = Vec::with_capacity(32);
        while let Some(parent) = self.nodes[item].parent {
            path.push(self.nodes[parent].child_lo != Some(item));
            item = parent;
        }
        for &bit in path.iter().rev() {
            writer.put_bit(bit);
        }
        Ok(())
    }

    fn decode(&self, reader: &mut BitReader<'_>) -> Result<usize> {
        let mut item = self.first();
        while let Some(child_lo) = self.nodes[item].child_lo {
            item = if reader.get_bit()? {
                self.nodes[child_lo].prev
            } else {
                child_lo
            };
            if item == HEAD {
                return Err(Error::compression("Huffman tree walked off its list"));
            }
        }
        Ok(self.nodes[item].value)
    }

    fn contains(&self, symbol: usize) -> bool {
        self.by_symbol[symbol].is_some()
    }
}

/// Writes bits least significant first
#[derive(Debug, Default)]
struct BitWriter {
    output: Vec<u8>,
    buffer: u32,
    count: u32,
}

impl BitWriter {
    fn put_bit(&mut self, bit: bool) {
        self.put_bits(bit as u32, 1);
    }

    fn put_bits(&mut self, value: u32, count: u32) {
        self.buffer |= value << self.count;
        self.count += count;
        while self.count >= 8 {
            self.output.push(self.buffer as u8);
            self.buffer >>= 8;
            self.count -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.output.push(self.buffer as u8);
        }
        self.output
    }
}

/// Reads bits least significant first
#[derive(Debug)]
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    buffer: u32,
    count: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            buffer: 0,
            count: 0,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let byte = self
            .data
            .get(self.position)
            .ok_or_else(|| Error::compression("Unexpected end of Huffman data"))?;
        self.buffer |= (*byte as u32) << self.count;
        self.count += 8;
        self.position += 1;
        Ok(())
    }

    fn get_bit(&mut self) -> Result<bool> {
        if self.count == 0 {
            self.refill()?;
        }
        let bit = self.buffer & 1 != 0;
        self.buffer >>= 1;
        self.count -= 1;
        Ok(bit)
    }

    fn get_8_bits(&mut self) -> Result<u8> {
        if self.count < 8 {
            self.refill()?;
        }
        let value = self.buffer as u8;
        self.buffer >>= 8;
        self.count -= 8;
        Ok(value)
    }
}

/// Compress data with the adaptive Huffman coder
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut tree = Tree::new();
    let mut writer = BitWriter::default();
    writer.put_bits(0, 8);

    for &byte in data {
        let symbol = byte as usize;
        if tree.contains(symbol) {
            tree.encode(&mut writer, symbol)?;
        } else {
            tree.encode(&mut writer, SYMBOL_NEW)?;
            writer.put_bits(byte as u32, 8);
            tree.insert_symbol(symbol);
        }
        if let Some(item) = tree.by_symbol[symbol] {
            tree.increment(item);
        }
    }

    tree.encode(&mut writer, SYMBOL_END)?;
    Ok(writer.finish())
}

/// Decompress a Huffman stream, producing at most `max_size` bytes
pub(crate) fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if data.is_empty() || max_size == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BitReader::new(data);
    let compression_type = reader.get_8_bits()?;
    if compression_type != 0 {
        return Err(Error::unsupported(format!(
            "Huffman compression type {compression_type}"
        )));
    }

    let mut tree = Tree::new();
    let mut output = Vec::with_capacity(max_size);

    loop {
        let mut symbol = tree.decode(&mut reader)?;
        if symbol == SYMBOL_END {
            break;
        }
        if symbol == SYMBOL_NEW {
            symbol = reader.get_8_bits()? as usize;
            tree.insert_symbol(symbol);
        }
        if symbol > 0xFF {
            return Err(Error::compression(format!(
                "Huffman decoded invalid symbol {symbol:#x}"
            )));
        }

        output.push(symbol as u8);
        if output.len() >= max_size {
            break;
        }
        if let Some(item) = tree.by_symbol[symbol] {
            tree.increment(item);
        }
    }

    Ok(output)
}
