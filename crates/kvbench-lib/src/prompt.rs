//! Deterministic scenario prompt generation
//!
//! Every strategy is a pure function of its parameters: generating the same
//! scenario twice yields byte-identical text, so round 2 replays exactly the
//! prompts of round 1.

use kvbench_types::{PromptDescriptor, ScenarioKind};

/// Tokens per whitespace word, used to size synthesized documents
const TOKENS_PER_WORD: f64 = 1.3;

const BASE_DOCUMENT: &str = "\
# Distributed Machine Learning Systems: A Comprehensive Guide

## 1. Introduction to Distributed Training
Deep learning models have grown exponentially in size and complexity. Training these massive
models requires distributed computing across multiple GPUs and nodes. This guide explores
the fundamental concepts, architectures, and best practices for distributed machine learning.

## 2. Data Parallelism
Data parallelism is the most common approach where different GPUs process different batches
of data with the same model. Each GPU maintains a complete copy of the model and computes
gradients independently. These gradients are then aggregated using collective communication
operations like AllReduce.

### 2.1 Synchronous Data Parallelism
In synchronous data parallelism, all workers wait for gradient aggregation before updating
model parameters. This ensures consistency but may suffer from stragglers.

### 2.2 Asynchronous Data Parallelism
Asynchronous approaches allow workers to update independently, improving throughput but
potentially affecting convergence due to stale gradients.

## 3. Model Parallelism
When models are too large to fit in a single GPU, model parallelism distributes different
parts of the model across multiple devices.

### 3.1 Tensor Parallelism
Splits individual layers across devices, requiring intensive communication between GPUs.

### 3.2 Pipeline Parallelism
Divides the model into stages, with each stage assigned to different GPUs. Micro-batching
is used to improve efficiency.

## 4. Communication Optimization
Efficient communication is critical for distributed training performance: gradient
compression and quantization, overlapping communication with computation, hierarchical
AllReduce algorithms, and RDMA or NVLink for high-bandwidth interconnects.

## 5. Fault Tolerance and Checkpointing
Distributed systems must handle failures gracefully through regular checkpointing of model
states, elastic training with dynamic worker pools, and automatic failure detection.

## 6. Performance Optimization
Key optimization techniques include mixed precision training (FP16/BF16), gradient
accumulation, the Zero Redundancy Optimizer (ZeRO), and memory-efficient attention.

## 7. Case Studies
GPT-3 with 175B parameters required combining data, tensor, and pipeline parallelism
across thousands of GPUs.
";

const SHARED_INSTRUCTION: &str = "You are a professional technical translator. ";

/// Prompt-construction strategy together with the parameters it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStrategy {
    HighPrefixReuse {
        context_length: u64,
        questions: Vec<String>,
    },
    MultiTurnConversation {
        turns: Vec<String>,
    },
    CodeGenerationContext {
        context_length: u64,
        tasks: Vec<String>,
    },
    BatchSharedInstruction {
        instruction_length: u64,
    },
    ColdStartUnique {
        content_length: u64,
    },
}

impl PromptStrategy {
    pub fn kind(&self) -> ScenarioKind {
        match self {
            PromptStrategy::HighPrefixReuse { .. } => ScenarioKind::HighPrefixReuse,
            PromptStrategy::MultiTurnConversation { .. } => ScenarioKind::MultiTurnConversation,
            PromptStrategy::CodeGenerationContext { .. } => ScenarioKind::CodeGenerationContext,
            PromptStrategy::BatchSharedInstruction { .. } => ScenarioKind::BatchSharedInstruction,
            PromptStrategy::ColdStartUnique { .. } => ScenarioKind::ColdStartUnique,
        }
    }
}

/// Builds a document of roughly `length` tokens by repeating the base text.
///
/// A length of 0 yields a single-word stub rather than an empty string.
pub fn synthesize_document(length: u64) -> String {
    let needed = ((length as f64 / TOKENS_PER_WORD) as usize).max(1);
    BASE_DOCUMENT
        .split_whitespace()
        .cycle()
        .take(needed)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generates exactly `num_requests` prompts for `strategy`.
///
/// Template lists are cycled by index; an empty list contributes empty text.
pub fn generate_prompts(strategy: &PromptStrategy, num_requests: usize) -> Vec<PromptDescriptor> {
    match strategy {
        PromptStrategy::HighPrefixReuse {
            context_length,
            questions,
        } => {
            let doc = synthesize_document(*context_length);
            (0..num_requests)
                .map(|i| PromptDescriptor {
                    index: i,
                    text: format!("{doc}\n\nQuestion #{i}: {}", cycled(questions, i)),
                    token_estimate: (*context_length).max(1),
                })
                .collect()
        }
        PromptStrategy::MultiTurnConversation { turns } => {
            let mut history = String::new();
            (0..num_requests)
                .map(|i| {
                    let turn = cycled(turns, i);
                    history.push_str(&format!("\n\nUser: {turn}\nAssistant: [detailed answer]\n"));
                    let words = history.split_whitespace().count();
                    PromptDescriptor {
                        index: i,
                        text: format!("Conversation history: {history}\n\nUser: {turn}\nAssistant:"),
                        token_estimate: (words as f64 * TOKENS_PER_WORD).round() as u64,
                    }
                })
                .collect()
        }
        PromptStrategy::CodeGenerationContext {
            context_length,
            tasks,
        } => {
            let ctx = synthesize_document(*context_length);
            (0..num_requests)
                .map(|i| PromptDescriptor {
                    index: i,
                    text: format!("Codebase:\n{ctx}\n\nTask #{i}: {}", cycled(tasks, i)),
                    token_estimate: (*context_length).max(1),
                })
                .collect()
        }
        PromptStrategy::BatchSharedInstruction { instruction_length } => {
            let repeats = (*instruction_length / 10).max(1) as usize;
            let instruction = SHARED_INSTRUCTION.repeat(repeats);
            (0..num_requests)
                .map(|i| PromptDescriptor {
                    index: i,
                    text: format!(
                        "{instruction}\n\nText #{i}:\nTechnical text {i}: Distributed systems..."
                    ),
                    token_estimate: (*instruction_length).max(1),
                })
                .collect()
        }
        PromptStrategy::ColdStartUnique { content_length } => {
            let content = synthesize_document(*content_length);
            (0..num_requests)
                .map(|i| PromptDescriptor {
                    index: i,
                    text: format!("Question #{}:\n{content}\n\nPlease analyze.", i * 137),
                    token_estimate: (*content_length).max(1),
                })
                .collect()
        }
    }
}

fn cycled(list: &[String], index: usize) -> &str {
    if list.is_empty() {
        ""
    } else {
        &list[index % list.len()]
    }
}
