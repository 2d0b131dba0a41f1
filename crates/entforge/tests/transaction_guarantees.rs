//! Transaction-level guarantees: deferred validation, complete failure
//! aggregation, and all-or-nothing session rollback.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use entforge::{
    Constraint, ConstraintValidator, ConstraintViolation, EntityFactory, EntityMeta,
    EntityValidator, Error, FieldDef, FieldValues, InMemorySession, MetadataRegistry,
    PersistenceSession, RelationDef, ValidatorProvider, ValueKind,
};

fn registry() -> Arc<MetadataRegistry> {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityMeta::new("Customer").with_field(
            FieldDef::new("name", ValueKind::Text)
                .required()
                .with_constraint(Constraint::NotBlank),
        ),
    );
    registry.register(
        EntityMeta::new("Order")
            .with_field(FieldDef::new("total", ValueKind::Int).required())
            .with_relation(RelationDef::one("customer", "Customer")),
    );
    Arc::new(registry)
}

fn setup() -> (EntityFactory, Rc<RefCell<InMemorySession>>) {
    init_tracing();
    let session = Rc::new(RefCell::new(InMemorySession::new()));
    let factory = EntityFactory::new(registry(), session.clone());
    (factory, session)
}

/// Route factory/session logs through the test harness; `RUST_LOG` controls
/// verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts validate calls while delegating to the constraint validator.
struct CountingValidator {
    calls: Rc<RefCell<usize>>,
}

impl EntityValidator for CountingValidator {
    fn validate(&self, meta: &EntityMeta, fields: &FieldValues) -> Vec<ConstraintViolation> {
        *self.calls.borrow_mut() += 1;
        ConstraintValidator.validate(meta, fields)
    }
}

struct CountingProvider {
    calls: Rc<RefCell<usize>>,
}

impl ValidatorProvider for CountingProvider {
    fn validator_for(&self, _meta: &EntityMeta) -> Box<dyn EntityValidator> {
        Box::new(CountingValidator {
            calls: self.calls.clone(),
        })
    }
}

#[test]
fn validation_runs_once_per_entity_at_transaction_end() {
    init_tracing();
    let calls = Rc::new(RefCell::new(0usize));
    let session = Rc::new(RefCell::new(InMemorySession::new()));
    let factory = EntityFactory::new(registry(), session)
        .with_validator_provider(Box::new(CountingProvider {
            calls: calls.clone(),
        }));

    let customer = factory.dto_factory().create_empty("Customer").unwrap();
    customer.borrow_mut().set_value("name", "Ada").unwrap();
    let order = factory.dto_factory().create_empty("Order").unwrap();
    order.borrow_mut().set_value("total", 5i64).unwrap();
    order.borrow_mut().set_nested_dto("customer", customer).unwrap();

    factory.create("Order", Some(order)).unwrap();

    // Two entities in the graph, one validate call each, none during
    // construction.
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn every_invalid_entity_is_reported_not_just_the_first() {
    let (factory, _session) = setup();

    // Order misses required "total", Customer's "name" is blank.
    let customer = factory.dto_factory().create_empty("Customer").unwrap();
    customer.borrow_mut().set_value("name", "   ").unwrap();
    let order = factory.dto_factory().create_empty("Order").unwrap();
    order.borrow_mut().set_nested_dto("customer", customer).unwrap();

    let err = factory.create("Order", Some(order)).unwrap_err();
    let Error::MultipleValidation(multi) = err else {
        panic!("expected aggregated validation failure, got {err}");
    };
    assert_eq!(multi.errors.len(), 2);
    assert_eq!(multi.for_entity_type("Order").count(), 1);
    assert_eq!(multi.for_entity_type("Customer").count(), 1);

    let customer_failure = multi.for_entity_type("Customer").next().unwrap();
    assert_eq!(customer_failure.violations[0].constraint, "not_blank");
}

#[test]
fn a_single_failure_still_arrives_aggregated() {
    let (factory, _session) = setup();
    let err = factory.create("Order", None).unwrap_err();
    let Error::MultipleValidation(multi) = err else {
        panic!("expected aggregated validation failure, got {err}");
    };
    assert_eq!(multi.errors.len(), 1);
    assert_eq!(multi.errors[0].violations[0].constraint, "required");
}

#[test]
fn failed_graph_leaves_the_session_untouched() {
    let (factory, session) = setup();

    // The customer part of the graph is valid; the order is not. Neither
    // may survive.
    let customer = factory.dto_factory().create_empty("Customer").unwrap();
    customer.borrow_mut().set_value("name", "Ada").unwrap();
    let order = factory.dto_factory().create_empty("Order").unwrap();
    order.borrow_mut().set_nested_dto("customer", customer).unwrap();

    assert!(factory.create("Order", Some(order)).is_err());
    assert_eq!(session.borrow().registered_count(), 0);
    assert_eq!(session.borrow().pending_new_count(), 0);
}

#[test]
fn non_validation_failures_also_roll_back() {
    let (factory, session) = setup();

    // A nested DTO of an undeclared entity type cannot even be staged, so
    // provoke the failure with a mismatched root type instead.
    let customer = factory.dto_factory().create_empty("Customer").unwrap();
    let err = factory.create("Order", Some(customer)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(session.borrow().registered_count(), 0);
}

#[test]
fn successive_transactions_are_independent() {
    let (factory, session) = setup();

    assert!(factory.create("Order", None).is_err());
    assert_eq!(session.borrow().registered_count(), 0);

    let order = factory.dto_factory().create_empty("Order").unwrap();
    order.borrow_mut().set_value("total", 7i64).unwrap();
    let order = factory.create("Order", Some(order)).unwrap();
    assert!(session.borrow().contains(&order));
    assert_eq!(session.borrow().registered_count(), 1);
}

#[test]
fn live_entities_keep_the_always_valid_guarantee_after_creation() {
    let (factory, _session) = setup();
    let dto = factory.dto_factory().create_empty("Customer").unwrap();
    dto.borrow_mut().set_value("name", "Ada").unwrap();
    let customer = factory.create("Customer", Some(dto)).unwrap();

    // A live update to a blank name fails and leaves the old value intact.
    let mut staged = entforge::Dto::new(customer.meta().clone());
    staged.set_id(customer.id().unwrap());
    staged.set_value("name", "   ").unwrap();
    assert!(matches!(
        customer.update(&staged).unwrap_err(),
        Error::Validation(_)
    ));
    assert_eq!(customer.get("name").unwrap().as_str(), Some("Ada"));
}
