use std::cell::Cell;

use rand::rngs::StdRng;
use rand::SeedableRng;
use textgen::error::ScoreError;
use textgen::model::{ModelArgs, Transformer};
use textgen::scorer::check_sequence;
use textgen::{
    CancelToken, Decoder, GenerateError, SamplingParams, Scorer, StopReason, Tokenizer,
    VocabTokenizer, PARAGRAPH_BREAK,
};

/// Picks `script[i]` at generation step `i + 1`, by a wide margin.
struct Scripted {
    vocab: usize,
    prompt_len: usize,
    script: Vec<u32>,
}

impl Scorer for Scripted {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        let step = ids.len() - self.prompt_len;
        let mut scores = vec![0.0; self.vocab];
        scores[self.script[step] as usize] = 50.0;
        Ok(scores)
    }
    fn vocab_size(&self) -> usize {
        self.vocab
    }
}

/// Refuses sequences longer than `max_seq_len`.
struct Limited {
    inner: Scripted,
    max_seq_len: usize,
}

impl Scorer for Limited {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        check_sequence(ids, self.inner.vocab, self.max_seq_len)?;
        self.inner.score(ids)
    }
    fn vocab_size(&self) -> usize {
        self.inner.vocab
    }
}

/// Cancels `token` on its `after`-th call.
struct Cancelling {
    vocab: usize,
    calls: Cell<usize>,
    after: usize,
    token: CancelToken,
}

impl Scorer for Cancelling {
    fn score(&self, _ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == self.after {
            self.token.cancel();
        }
        Ok(vec![1.0; self.vocab])
    }
    fn vocab_size(&self) -> usize {
        self.vocab
    }
}

fn ids(t: &VocabTokenizer, pieces: &[&str]) -> Vec<u32> {
    pieces.iter().map(|p| t.id_of(p).unwrap()).collect()
}

fn reference_model() -> Transformer {
    Transformer::new(ModelArgs {
        n_layers: 1,
        dim: 32,
        hidden_dim: 64,
        ..ModelArgs::default()
    })
    .unwrap()
}

#[test]
fn generated_length_never_exceeds_max_steps() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    for (seed, max_steps) in [(1u64, 1usize), (2, 7), (3, 20)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let g = decoder
            .generate("Once upon a time", &SamplingParams::new(max_steps, 0.8, 40), &mut rng)
            .unwrap();
        assert!(g.generated_ids.len() <= max_steps);
        assert_eq!(g.fragments.len(), g.generated_ids.len());
        assert!(g.text.starts_with("Once upon a time"));
    }
}

#[test]
fn stops_right_after_paragraph_break() {
    let t = VocabTokenizer::ascii();
    let prompt = "Hi";
    let script = ids(&t, &["y", "o", PARAGRAPH_BREAK, "z", "z"]);
    let scorer = Scripted {
        vocab: t.vocab_size(),
        prompt_len: 2,
        script,
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let g = decoder
        .generate(prompt, &SamplingParams::new(5, 1.0, 3), &mut rng)
        .unwrap();
    assert_eq!(g.stop, StopReason::Sentinel);
    assert_eq!(g.generated_ids.len(), 3);
    assert_eq!(g.text, "Hiyo\n\n");
    assert!(g.text.ends_with(PARAGRAPH_BREAK));
}

#[test]
fn unbounded_max_steps_stops_on_paragraph_break() {
    let t = VocabTokenizer::ascii();
    let scorer = Scripted {
        vocab: t.vocab_size(),
        prompt_len: 2,
        script: ids(&t, &[PARAGRAPH_BREAK]),
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let g = decoder
        .generate("hi", &SamplingParams::new(usize::MAX, 1.0, 1), &mut rng)
        .unwrap();
    assert_eq!(g.stop, StopReason::Sentinel);
    assert_eq!(g.generated_ids.len(), 1);
    assert_eq!(g.text, "hi\n\n");
}

#[test]
fn large_max_steps_runs_until_context_limit() {
    let t = VocabTokenizer::ascii();
    let scorer = Limited {
        inner: Scripted {
            vocab: t.vocab_size(),
            prompt_len: 2,
            script: ids(&t, &["a"; 8]),
        },
        max_seq_len: 6,
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let err = decoder
        .generate("hi", &SamplingParams::new(1_000_000_000, 1.0, 1), &mut rng)
        .unwrap_err();
    assert!(matches!(
        err,
        GenerateError::Scoring {
            step: 6,
            source: ScoreError::ContextLength { len: 7, max: 6 },
        }
    ));
}

#[test]
fn single_newlines_do_not_stop() {
    let t = VocabTokenizer::ascii();
    let script = ids(&t, &["\n", "\n", "a"]);
    let scorer = Scripted {
        vocab: t.vocab_size(),
        prompt_len: 1,
        script,
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let g = decoder
        .generate("x", &SamplingParams::new(3, 1.0, 1), &mut rng)
        .unwrap();
    assert_eq!(g.stop, StopReason::MaxSteps);
    assert_eq!(g.text, "x\n\na");
}

#[test]
fn top_k_one_is_reproducible_across_random_sources() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    let params = SamplingParams::new(5, 0.7, 1);

    let mut first_rng = StdRng::seed_from_u64(1);
    let first = decoder
        .generate("The quick brown fox", &params, &mut first_rng)
        .unwrap();
    for seed in 2..6 {
        let mut rng = StdRng::seed_from_u64(seed);
        let again = decoder
            .generate("The quick brown fox", &params, &mut rng)
            .unwrap();
        assert_eq!(again.text, first.text);
        assert_eq!(again.generated_ids, first.generated_ids);
    }
}

#[test]
fn same_seed_same_output() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    let params = SamplingParams::new(12, 1.2, 20);
    let run = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        decoder.generate("seed", &params, &mut rng).unwrap().text
    };
    assert_eq!(run(99), run(99));
}

#[test]
fn top_k_above_vocab_is_clamped() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    let mut rng = StdRng::seed_from_u64(5);
    let g = decoder
        .generate("abc", &SamplingParams::new(4, 1.0, 10_000), &mut rng)
        .unwrap();
    assert!(g.generated_ids.iter().all(|&id| (id as usize) < t.vocab_size()));
}

#[test]
fn context_overflow_on_step_three_returns_no_partial_text() {
    let t = VocabTokenizer::ascii();
    let prompt = "The quick brown fox";
    assert_eq!(t.encode(prompt).unwrap().len(), 19);
    let scorer = Limited {
        inner: Scripted {
            vocab: t.vocab_size(),
            prompt_len: 19,
            script: ids(&t, &["a"; 5]),
        },
        max_seq_len: 20,
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let result = decoder.generate(prompt, &SamplingParams::new(5, 0.7, 1), &mut rng);
    match result {
        Err(GenerateError::Scoring {
            step: 3,
            source: ScoreError::ContextLength { len: 21, max: 20 },
        }) => {}
        other => panic!("expected context-length failure at step 3, got {other:?}"),
    }
}

#[test]
fn empty_prompt_yields_model_only_continuation() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    let mut rng = StdRng::seed_from_u64(3);
    let g = decoder
        .generate("", &SamplingParams::new(6, 0.7, 50), &mut rng)
        .unwrap();
    assert!(g.prompt_ids.is_empty());
    assert!(!g.generated_ids.is_empty());
    assert_eq!(g.text, g.continuation());
}

#[test]
fn fragment_decoding_agrees_with_whole_decoding() {
    let t = VocabTokenizer::ascii();
    let model = reference_model();
    let decoder = Decoder::new(&t, &model);
    let mut rng = StdRng::seed_from_u64(17);
    let g = decoder
        .generate("Round trip: ", &SamplingParams::new(30, 1.5, 98), &mut rng)
        .unwrap();
    assert_eq!(t.decode(&g.generated_ids).unwrap(), g.continuation());
}

#[test]
fn cancellation_between_steps() {
    let t = VocabTokenizer::ascii();
    let token = CancelToken::new();
    let scorer = Cancelling {
        vocab: t.vocab_size(),
        calls: Cell::new(0),
        after: 2,
        token: token.clone(),
    };
    let decoder = Decoder::new(&t, &scorer);
    let mut rng = StdRng::seed_from_u64(0);
    let err = decoder
        .generate_with_cancel("go", &SamplingParams::new(10, 1.0, 5), &mut rng, &token)
        .unwrap_err();
    assert!(matches!(err, GenerateError::Cancelled { step: 3 }));
    assert_eq!(scorer.calls.get(), 2);
}
