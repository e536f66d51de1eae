//! End-to-end tests for split allocation, upload and distributed dispatch
//! against in-process reference servers.

use std::net::TcpListener;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use moesplit_client::{ClientError, Endpoint};
use moesplit_engine::kernel::{f32s_to_bytes, mul_mat_id_f32};
use moesplit_engine::{is_rpc_split, DType, EngineError, SplitBufferType, TensorDesc};
use moesplit_harness::TestServer;
use moesplit_protocol::{caps, CapsResponsePayload, Frame, Payload};

fn split_type(servers: &[TestServer], weights: &[f32]) -> SplitBufferType {
    let endpoints: Vec<Endpoint> = servers.iter().map(|s| s.endpoint()).collect();
    SplitBufferType::connect(endpoints, weights).unwrap()
}

fn random_f32s(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let tolerance = 1e-5 * e.abs().max(1.0);
        assert!(
            (a - e).abs() <= tolerance,
            "value {i}: got {a}, expected {e}"
        );
    }
}

#[test]
fn test_upload_roundtrip_reconstructs_bytes() {
    let servers = [
        TestServer::spawn().unwrap(),
        TestServer::spawn().unwrap(),
        TestServer::spawn().unwrap(),
    ];
    let buft = split_type(&servers, &[0.33, 0.33, 0.34]);
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("blk.0.ffn_down_exps.weight", DType::F32, [4, 3, 12]).unwrap();
    let data: Vec<u8> = (0..desc.nbytes()).map(|i| (i % 251) as u8).collect();

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &data).unwrap();

    // Re-gathering shards in endpoint order reconstructs the original bytes
    let gathered = buffer.gather_tensor(&desc.name).unwrap();
    assert_eq!(gathered, data);

    let plan = buffer.plan_for(&desc.name).unwrap();
    let total: i64 = plan.ranges().iter().map(|r| r.width()).sum();
    assert_eq!(total, 12);
}

#[test]
fn test_dispatch_matches_single_device_compute() {
    // Two endpoints x 8 experts, top_k = 2, four tokens
    let servers = [TestServer::spawn().unwrap(), TestServer::spawn().unwrap()];
    let buft = split_type(&servers, &[0.5, 0.5]);
    let buffer = buft.alloc_buffer();

    let (n_embd, n_ff, n_expert) = (6usize, 6usize, 8i64);
    let desc =
        TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [6, 6, 8]).unwrap();
    let weights = random_f32s(n_embd * n_ff * n_expert as usize, 11);
    let activations = random_f32s(n_embd * 4, 13);
    let routing: Vec<i32> = vec![1, 5, 2, 3, 4, 6, 0, 7];

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &f32s_to_bytes(&weights)).unwrap();

    let out = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &routing, 2, 4)
        .unwrap();

    let expected = mul_mat_id_f32(
        &weights, n_embd, n_ff, &activations, &routing, 2, 4, 0, n_expert,
    );
    assert_close(&out, &expected);

    // Endpoint 0 owns experts [0, 4): its partial covers tokens 0, 1 and 3
    // and leaves token 2 (experts 4 and 6) zero
    let low_partial = mul_mat_id_f32(
        &weights, n_embd, n_ff, &activations, &routing, 2, 4, 0, 4,
    );
    assert!(low_partial[2 * n_ff..3 * n_ff].iter().all(|&v| v == 0.0));
    for token in [0usize, 1, 3] {
        assert!(low_partial[token * n_ff..(token + 1) * n_ff]
            .iter()
            .any(|&v| v != 0.0));
    }
}

#[test]
fn test_dispatch_uneven_split_many_tokens() {
    let servers = [
        TestServer::spawn().unwrap(),
        TestServer::spawn().unwrap(),
        TestServer::spawn().unwrap(),
    ];
    let buft = split_type(&servers, &[24.0, 12.0, 6.0]);
    let buffer = buft.alloc_buffer();

    let (n_embd, n_ff, n_expert, top_k, n_tokens) = (8usize, 5usize, 21i64, 3usize, 9usize);
    let desc = TensorDesc::new("blk.4.ffn_gate_exps.weight", DType::F32, [8, 5, 21]).unwrap();
    let weights = random_f32s(n_embd * n_ff * n_expert as usize, 21);
    let activations = random_f32s(n_embd * n_tokens, 22);
    let mut rng = StdRng::seed_from_u64(23);
    let routing: Vec<i32> = (0..top_k * n_tokens)
        .map(|_| rng.gen_range(0..n_expert as i32))
        .collect();

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &f32s_to_bytes(&weights)).unwrap();

    let out = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &routing, top_k, n_tokens)
        .unwrap();
    let expected = mul_mat_id_f32(
        &weights, n_embd, n_ff, &activations, &routing, top_k, n_tokens, 0, n_expert,
    );
    assert_close(&out, &expected);
}

#[test]
fn test_non_expert_tensor_lands_whole_on_endpoint_zero() {
    let servers = [TestServer::spawn().unwrap(), TestServer::spawn().unwrap()];
    let buft = split_type(&servers, &[0.5, 0.5]);
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("token_embd.weight", DType::F32, [8, 16, 1]).unwrap();
    let data: Vec<u8> = (0..desc.nbytes()).map(|i| (i % 13) as u8).collect();

    buffer.alloc_tensor(&desc).unwrap();
    buffer.upload_tensor(&desc.name, &data).unwrap();

    assert!(buffer.plan_for(&desc.name).is_none());
    assert_eq!(servers[0].buffer_count(), 1);
    assert_eq!(servers[1].buffer_count(), 0);
    assert_eq!(buffer.gather_tensor(&desc.name).unwrap(), data);
}

#[test]
fn test_queries() {
    let servers = [TestServer::spawn().unwrap(), TestServer::spawn().unwrap()];
    let buft = split_type(&servers, &[3.0, 1.0]);

    assert!(is_rpc_split(&buft));
    assert_eq!(buft.n_endpoints(), 2);
    assert_eq!(buft.endpoints()[0].addr(), servers[0].endpoint().addr());
    assert!((buft.weights()[0] - 0.75).abs() < 1e-6);

    let single = SplitBufferType::single(servers[0].endpoint()).unwrap();
    assert!(!is_rpc_split(&single));
}

#[test]
fn test_free_all_releases_every_shard() {
    let servers = [TestServer::spawn().unwrap(), TestServer::spawn().unwrap()];
    let buft = split_type(&servers, &[0.5, 0.5]);
    let buffer = buft.alloc_buffer();

    let expert = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [4, 4, 8]).unwrap();
    let dense = TensorDesc::new("output_norm.weight", DType::F32, [64, 1, 1]).unwrap();
    buffer.alloc_tensor(&expert).unwrap();
    buffer.alloc_tensor(&dense).unwrap();
    assert!(servers[0].buffer_count() + servers[1].buffer_count() >= 3);

    buffer.free_all().unwrap();
    assert_eq!(servers[0].buffer_count(), 0);
    assert_eq!(servers[1].buffer_count(), 0);
    assert_eq!(buffer.n_tensors(), 0);
}

#[test]
fn test_drop_frees_remote_shards() {
    let server = TestServer::spawn().unwrap();
    {
        let buft = SplitBufferType::connect(vec![server.endpoint()], &[1.0]).unwrap();
        let buffer = buft.alloc_buffer();
        let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [4, 4, 8]).unwrap();
        buffer.alloc_tensor(&desc).unwrap();
        assert_eq!(server.buffer_count(), 1);
    }
    assert_eq!(server.buffer_count(), 0);
}

#[test]
fn test_remote_oom_names_the_endpoint() {
    let server = TestServer::spawn_constrained(caps::ALL, 256).unwrap();
    let endpoint_addr = server.endpoint().addr();
    let buft = SplitBufferType::connect(vec![server.endpoint()], &[1.0]).unwrap();
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [64, 64, 16]).unwrap();
    let err = buffer.alloc_tensor(&desc).unwrap_err();
    match err {
        EngineError::Client(ClientError::RemoteOom { ref endpoint, .. }) => {
            assert!(endpoint.contains(&endpoint_addr));
        }
        other => panic!("expected RemoteOom, got {other:?}"),
    }
}

#[test]
fn test_connect_failure_aborts_load() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port(), 0);
    drop(listener);

    let err = SplitBufferType::connect(vec![dead.clone()], &[1.0]).unwrap_err();
    assert!(err.to_string().contains(&dead.addr()));
}

#[test]
fn test_dispatch_shape_mismatches_are_rejected() {
    let server = TestServer::spawn().unwrap();
    let buft = SplitBufferType::connect(vec![server.endpoint()], &[1.0]).unwrap();
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [4, 4, 8]).unwrap();
    buffer.alloc_tensor(&desc).unwrap();
    buffer
        .upload_tensor(&desc.name, &f32s_to_bytes(&random_f32s(4 * 4 * 8, 31)))
        .unwrap();

    let activations = random_f32s(4 * 2, 32);

    // Wrong activation length
    let err = buffer
        .dispatch_mul_mat_id(&desc.name, &activations[..7], &[0, 1, 2, 3], 2, 2)
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));

    // Routing id outside the expert bank
    let err = buffer
        .dispatch_mul_mat_id(&desc.name, &activations, &[0, 8, 1, 2], 2, 2)
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));

    // Dispatch on an unsplit tensor
    let dense = TensorDesc::new("output.weight", DType::F32, [4, 4, 1]).unwrap();
    buffer.alloc_tensor(&dense).unwrap();
    let err = buffer
        .dispatch_mul_mat_id(&dense.name, &activations, &[0, 1, 2, 3], 2, 2)
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));

    // Unknown tensor
    let err = buffer
        .dispatch_mul_mat_id("nope", &activations, &[0, 1, 2, 3], 2, 2)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownTensor(_)));
}

#[test]
fn test_upload_size_mismatch_rejected() {
    let server = TestServer::spawn().unwrap();
    let buft = SplitBufferType::connect(vec![server.endpoint()], &[1.0]).unwrap();
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [4, 4, 8]).unwrap();
    buffer.alloc_tensor(&desc).unwrap();

    let err = buffer.upload_tensor(&desc.name, &[0u8; 16]).unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch(_)));
}

/// A server that answers the CAPS probe, then drops the connection on the
/// first real request.
fn flaky_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _probe = Frame::read_from(&mut stream).unwrap();
        CapsResponsePayload { mask: caps::ALL }
            .into_frame()
            .write_to(&mut stream)
            .unwrap();
        let _request = Frame::read_from(&mut stream);
        // connection dropped here without a reply
    });
    Endpoint::new("127.0.0.1", port, 0)
}

#[test]
fn test_transport_error_poisons_the_buffer() {
    let buft = SplitBufferType::connect(vec![flaky_endpoint()], &[1.0]).unwrap();
    let buffer = buft.alloc_buffer();

    let desc = TensorDesc::new("blk.0.ffn_up_exps.weight", DType::F32, [4, 4, 8]).unwrap();
    let err = buffer.alloc_tensor(&desc).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Client(ClientError::Transport { .. })
    ));

    // Every later operation fails fast
    let err = buffer.alloc_tensor(&desc).unwrap_err();
    assert!(matches!(err, EngineError::Poisoned { .. }));
    let err = buffer.gather_tensor(&desc.name).unwrap_err();
    assert!(matches!(err, EngineError::Poisoned { .. }));
}
