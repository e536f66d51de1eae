//! Gather fallback: servers without partial-matmul support still serve
//! correct results by shipping their shards back for local compute.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use moesplit_client::{ClientError, Endpoint};
use moesplit_engine::kernel::{f32s_to_bytes, mul_mat_id_f32};
use moesplit_engine::{DType, EngineError, SplitBufferType, TensorDesc};
use moesplit_harness::TestServer;
use moesplit_protocol::caps;

const LEGACY: u64 = caps::ALLOC | caps::FREE | caps::UPLOAD | caps::DOWNLOAD;

fn random_f32s(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn loaded_buffer(servers: &[TestServer]) -> (SplitBufferType, TensorDesc) {
    let endpoints: Vec<Endpoint> = servers.iter().map(|s| s.endpoint()).collect();
    let buft = SplitBufferType::connect(endpoints, &vec![1.0; servers.len()]).unwrap();
    let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [5, 4, 6]).unwrap();
    (buft, desc)
}

#[test]
fn test_legacy_servers_fall_back_to_gather() {
    let servers = [
        TestServer::spawn_with_caps(LEGACY).unwrap(),
        TestServer::spawn_with_caps(LEGACY).unwrap(),
    ];
    let (buft, desc) = loaded_buffer(&servers);
    let buffer = buft.alloc_buffer();

    let weights = random_f32s(5 * 4 * 6, 41);
    let activations = random_f32s(5 * 3, 42);
    let routing = vec![0, 5, 2, 4, 1, 3];

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &f32s_to_bytes(&weights)).unwrap();

    let out = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &routing, 2, 3)
        .unwrap();
    let expected = mul_mat_id_f32(&weights, 5, 4, &activations, &routing, 2, 3, 0, 6);
    assert_eq!(out, expected);
}

#[test]
fn test_mixed_capabilities_fall_back_to_gather() {
    // One modern server, one legacy: the whole dispatch takes the gather
    // path because a partial result cannot be substituted
    let servers = [
        TestServer::spawn().unwrap(),
        TestServer::spawn_with_caps(LEGACY).unwrap(),
    ];
    let (buft, desc) = loaded_buffer(&servers);
    let buffer = buft.alloc_buffer();

    let weights = random_f32s(5 * 4 * 6, 43);
    let activations = random_f32s(5 * 2, 44);
    let routing = vec![0, 4, 5, 1];

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &f32s_to_bytes(&weights)).unwrap();

    let out = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &routing, 2, 2)
        .unwrap();
    let expected = mul_mat_id_f32(&weights, 5, 4, &activations, &routing, 2, 2, 0, 6);
    assert_eq!(out, expected);
}

#[test]
fn test_no_fallback_possible_surfaces_protocol_mismatch() {
    let mask = caps::ALLOC | caps::FREE | caps::UPLOAD;
    let servers = [TestServer::spawn_with_caps(mask).unwrap()];
    let (buft, desc) = loaded_buffer(&servers);
    let buffer = buft.alloc_buffer();

    let weights = random_f32s(5 * 4 * 6, 45);
    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &f32s_to_bytes(&weights)).unwrap();

    let activations = random_f32s(5, 46);
    let err = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &[0, 1], 2, 1)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Client(ClientError::ProtocolMismatch { .. })
    ));
}
