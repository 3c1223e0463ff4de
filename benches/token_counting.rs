use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dialogue_engine::context::{Message, TokenAccountant, TokenBudget};

fn conversation(turns: usize) -> Vec<Message> {
    let mut messages = vec![Message::system(
        "You play role of professional developer who obsessed with clean code.",
    )];
    for i in 0..turns {
        messages.push(Message::user(format!(
            "Please review function number {i} and suggest how to split it into smaller pieces."
        )));
        messages.push(Message::assistant(format!(
            "Function {i} mixes parsing with validation. Extract the validation into its own \
             helper and return a typed error instead of a string."
        )));
    }
    messages
}

fn bench_count_messages(c: &mut Criterion) {
    let accountant = TokenAccountant::for_model("gpt-4").unwrap();
    let short = conversation(4);
    let long = conversation(64);

    c.bench_function("count_messages/short", |b| {
        b.iter(|| accountant.count_messages(black_box(&short)))
    });
    c.bench_function("count_messages/long", |b| {
        b.iter(|| accountant.count_messages(black_box(&long)))
    });

    let budget = TokenBudget::for_model("gpt-4", 1000);
    c.bench_function("remaining_output_tokens/long", |b| {
        b.iter(|| accountant.remaining_output_tokens(black_box(&long), &budget))
    });
}

criterion_group!(benches, bench_count_messages);
criterion_main!(benches);
