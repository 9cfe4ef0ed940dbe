// Archive packager: artifact bytes -> content root CID + CARv1 blob.
//
// Content is split into 256 KiB raw leaves. A single leaf is its own root;
// more leaves are linked under UnixFS file nodes (dag-pb, at most 174 links
// per node). The CAR carries every block, root first, and is itself
// addressed by a CID with the CAR multicodec. Nothing here depends on time
// or randomness, so identical bytes always produce identical identifiers.

use std::collections::HashSet;

use cid::Cid;
use feedvault_common::Bundle;
use multihash_codetable::{Code, MultihashDigest};

const RAW_CODEC: u64 = 0x55;
const DAG_PB_CODEC: u64 = 0x70;
const CAR_CODEC: u64 = 0x0202;

/// Leaf size used when chunking content.
pub const CHUNK_SIZE: usize = 256 * 1024;
/// Maximum links per UnixFS file node.
pub const MAX_LINKS: usize = 174;

/// A bundle together with the CAR bytes it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBundle {
    pub bundle: Bundle,
    pub car: Vec<u8>,
}

struct Block {
    cid: Cid,
    data: Vec<u8>,
}

/// Reference to a node already emitted as a block.
struct DagNode {
    cid: Cid,
    /// Bytes of file content below this node.
    file_size: u64,
    /// Encoded size of this node plus everything below it.
    tree_size: u64,
}

/// Package artifact bytes into a content-addressed bundle.
pub fn pack(bytes: &[u8]) -> PackedBundle {
    let mut blocks = Vec::new();
    let root = build_dag(bytes, &mut blocks);
    let car = encode_car(&root, blocks);
    let car_cid = Cid::new_v1(CAR_CODEC, Code::Sha2_256.digest(&car));

    PackedBundle {
        bundle: Bundle {
            root: root.to_string(),
            car: car_cid.to_string(),
            size: car.len() as u64,
        },
        car,
    }
}

/// CID of raw bytes as a single block.
pub fn raw_cid(bytes: &[u8]) -> Cid {
    Cid::new_v1(RAW_CODEC, Code::Sha2_256.digest(bytes))
}

fn build_dag(bytes: &[u8], blocks: &mut Vec<Block>) -> Cid {
    let mut level: Vec<DagNode> = if bytes.is_empty() {
        vec![leaf(&[], blocks)]
    } else {
        bytes.chunks(CHUNK_SIZE).map(|c| leaf(c, blocks)).collect()
    };

    while level.len() > 1 {
        level = level
            .chunks(MAX_LINKS)
            .map(|children| file_node(children, blocks))
            .collect();
    }

    level.remove(0).cid
}

fn leaf(chunk: &[u8], blocks: &mut Vec<Block>) -> DagNode {
    let cid = raw_cid(chunk);
    blocks.push(Block {
        cid,
        data: chunk.to_vec(),
    });
    DagNode {
        cid,
        file_size: chunk.len() as u64,
        tree_size: chunk.len() as u64,
    }
}

/// Encode a UnixFS file node linking `children` and emit it as a dag-pb block.
fn file_node(children: &[DagNode], blocks: &mut Vec<Block>) -> DagNode {
    let file_size: u64 = children.iter().map(|c| c.file_size).sum();

    // UnixFS Data { Type = File, filesize, blocksizes* }
    let mut unixfs = vec![0x08, 0x02, 0x18];
    write_varint(file_size, &mut unixfs);
    for child in children {
        unixfs.push(0x20);
        write_varint(child.file_size, &mut unixfs);
    }

    // PBNode: Links (field 2) precede Data (field 1) in canonical form.
    let mut node = Vec::new();
    for child in children {
        let link = encode_link(child);
        node.push(0x12);
        write_varint(link.len() as u64, &mut node);
        node.extend_from_slice(&link);
    }
    node.push(0x0a);
    write_varint(unixfs.len() as u64, &mut node);
    node.extend_from_slice(&unixfs);

    let cid = Cid::new_v1(DAG_PB_CODEC, Code::Sha2_256.digest(&node));
    let tree_size = node.len() as u64 + children.iter().map(|c| c.tree_size).sum::<u64>();
    blocks.push(Block { cid, data: node });

    DagNode {
        cid,
        file_size,
        tree_size,
    }
}

/// PBLink { Hash, Name = "", Tsize }
fn encode_link(child: &DagNode) -> Vec<u8> {
    let cid_bytes = child.cid.to_bytes();
    let mut link = vec![0x0a];
    write_varint(cid_bytes.len() as u64, &mut link);
    link.extend_from_slice(&cid_bytes);
    link.extend_from_slice(&[0x12, 0x00, 0x18]);
    write_varint(child.tree_size, &mut link);
    link
}

/// CARv1: varint-prefixed DAG-CBOR header, then varint-prefixed
/// `cid || data` sections. The root block is written first and repeated
/// blocks only once.
fn encode_car(root: &Cid, mut blocks: Vec<Block>) -> Vec<u8> {
    let header = encode_header(root);
    let mut car = Vec::with_capacity(
        header.len() + blocks.iter().map(|b| b.data.len() + 48).sum::<usize>(),
    );
    write_varint(header.len() as u64, &mut car);
    car.extend_from_slice(&header);

    if let Some(pos) = blocks.iter().position(|b| b.cid == *root) {
        let root_block = blocks.remove(pos);
        blocks.insert(0, root_block);
    }

    let mut written = HashSet::new();
    for block in &blocks {
        if !written.insert(block.cid) {
            continue;
        }
        let cid_bytes = block.cid.to_bytes();
        write_varint((cid_bytes.len() + block.data.len()) as u64, &mut car);
        car.extend_from_slice(&cid_bytes);
        car.extend_from_slice(&block.data);
    }
    car
}

/// `{"roots": [root], "version": 1}` in DAG-CBOR. Keys are already in
/// canonical (length-first) order.
fn encode_header(root: &Cid) -> Vec<u8> {
    let cid_bytes = root.to_bytes();
    let mut header = vec![0xa2, 0x65];
    header.extend_from_slice(b"roots");
    // array(1), tag(42)
    header.extend_from_slice(&[0x81, 0xd8, 0x2a]);
    // CID links are byte strings with a leading identity multibase prefix
    write_cbor_bytes_len(cid_bytes.len() + 1, &mut header);
    header.push(0x00);
    header.extend_from_slice(&cid_bytes);
    header.push(0x67);
    header.extend_from_slice(b"version");
    header.push(0x01);
    header
}

fn write_cbor_bytes_len(len: usize, out: &mut Vec<u8>) {
    match len {
        0..=23 => out.push(0x40 | len as u8),
        24..=0xff => out.extend_from_slice(&[0x58, len as u8]),
        0x100..=0xffff => {
            out.push(0x59);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(0x5a);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
}

/// Unsigned LEB128, as used by both CAR framing and protobuf.
pub(crate) fn write_varint(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_varint(bytes: &[u8]) -> (u64, usize) {
        let mut value = 0u64;
        for (i, b) in bytes.iter().enumerate() {
            value |= ((b & 0x7f) as u64) << (7 * i);
            if b & 0x80 == 0 {
                return (value, i + 1);
            }
        }
        panic!("unterminated varint");
    }

    #[test]
    fn varint_encoding() {
        let mut out = Vec::new();
        write_varint(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);

        out.clear();
        write_varint(5, &mut out);
        assert_eq!(out, vec![0x05]);
    }

    #[test]
    fn empty_content_has_well_known_cid() {
        let packed = pack(b"");
        assert_eq!(
            packed.bundle.root,
            "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
        );
    }

    #[test]
    fn packing_is_deterministic() {
        let csv = b"Name,Handle\nAda,@ada\n";
        let a = pack(csv);
        let b = pack(csv);
        assert_eq!(a.bundle, b.bundle);
        assert_eq!(a.car, b.car);
    }

    #[test]
    fn different_bytes_give_different_bundles() {
        let a = pack(b"Name,Handle\nAda,@ada\n");
        let b = pack(b"Name,Handle\nGrace,@grace\n");
        assert_ne!(a.bundle.root, b.bundle.root);
        assert_ne!(a.bundle.car, b.bundle.car);
    }

    #[test]
    fn small_artifact_is_single_raw_block() {
        let packed = pack(b"hello");
        assert!(packed.bundle.root.starts_with("bafkrei"));
        assert!(packed.bundle.car.starts_with("bag"));
        assert_eq!(packed.bundle.size, packed.car.len() as u64);
        assert_eq!(packed.bundle.root, raw_cid(b"hello").to_string());
    }

    #[test]
    fn car_layout_is_header_then_root_block() {
        let packed = pack(b"hello");
        let (header_len, offset) = read_varint(&packed.car);
        let header = &packed.car[offset..offset + header_len as usize];
        assert_eq!(header[0], 0xa2);
        assert_eq!(&header[2..7], b"roots");

        let rest = &packed.car[offset + header_len as usize..];
        let (section_len, offset) = read_varint(rest);
        let section = &rest[offset..offset + section_len as usize];
        let root_bytes = raw_cid(b"hello").to_bytes();
        assert_eq!(&section[..root_bytes.len()], root_bytes.as_slice());
        assert_eq!(&section[root_bytes.len()..], b"hello");
    }

    #[test]
    fn large_artifact_gets_dag_pb_root() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let packed = pack(&data);
        assert!(packed.bundle.root.starts_with("bafybei"));
        // header + 3 leaves + 1 file node, and the content is all in there
        assert!(packed.car.len() > data.len());
        assert_eq!(pack(&data).bundle, packed.bundle);
    }

    #[test]
    fn wide_content_builds_more_than_one_level() {
        let data = vec![1u8; CHUNK_SIZE * (MAX_LINKS + 1)];
        let mut blocks = Vec::new();
        let root = build_dag(&data, &mut blocks);
        let leaves = MAX_LINKS + 1;
        // two nodes on the first level, one root above them
        assert_eq!(blocks.len(), leaves + 3);
        assert_eq!(blocks.last().unwrap().cid, root);
    }
}
