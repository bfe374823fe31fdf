/// Decide and apply in one step, without persistence or publication.
///
/// Used by domain tests and by in-memory simulations; production paths go
/// through the infra `CommandDispatcher` instead.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: keel_core::Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
