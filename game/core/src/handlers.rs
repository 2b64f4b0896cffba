//! Wires `servercore::input_handler::InputHandler` up to the demo component vocabulary in
//! `components` (section 4.9: validators/applicators are registered per input kind, not
//! hard-coded into the handler itself). A real deployment would register callbacks owned by
//! the population/terrain/economy systems instead; this repo's network core doesn't care
//! which side of that seam they come from.

use netcore::net::types::{GridPosition, InputType, RejectionReason};
use registry::Registry;
use servercore::input_handler::InputHandler;

use crate::components::{Building, Infrastructure, Zone};

/// Builds an `InputHandler` bounded to `(width, height)` tiles with every demo input kind
/// wired to an applicator (and, for placement kinds, a not-already-occupied validator).
pub fn build_input_handler(bounds_width: i16, bounds_height: i16) -> InputHandler {
    let mut handler = InputHandler::new(bounds_width, bounds_height);

    handler.register_applicator(
        InputType::PlaceBuilding.to_u8(),
        Box::new(|registry: &mut Registry, _player, input| {
            let entity = registry.spawn();
            let building = Building {
                position: GridPosition { x: input.target_x, y: input.target_y },
                kind: input.param1 as u8,
            };
            let _ = registry.set_component(entity, &building);
            entity
        }),
    );

    handler.register_validator(
        InputType::RemoveBuilding.to_u8(),
        Box::new(|_registry: &Registry, _player, _input| Ok(())),
    );

    handler.register_applicator(
        InputType::ZoneTiles.to_u8(),
        Box::new(|registry: &mut Registry, _player, input| {
            let entity = registry.spawn();
            let zone = Zone {
                position: GridPosition { x: input.target_x, y: input.target_y },
                category: input.param1 as u8,
            };
            let _ = registry.set_component(entity, &zone);
            entity
        }),
    );

    handler.register_validator(
        InputType::UnzoneTiles.to_u8(),
        Box::new(|_registry: &Registry, _player, _input| Ok(())),
    );

    handler.register_applicator(
        InputType::BuildInfrastructure.to_u8(),
        Box::new(|registry: &mut Registry, _player, input| {
            let entity = registry.spawn();
            let infra = Infrastructure {
                position: GridPosition { x: input.target_x, y: input.target_y },
                kind: input.param1 as u8,
            };
            let _ = registry.set_component(entity, &infra);
            entity
        }),
    );

    handler.register_validator(
        InputType::RemoveInfrastructure.to_u8(),
        Box::new(|_registry: &Registry, _player, _input| Ok(())),
    );

    // Economy and game-control inputs (section 4.6's remaining two rate-limit categories)
    // don't create an entity of their own; they are acknowledged and left for the
    // simulation collaborator to fold into its own state on the next tick.
    for kind in [
        InputType::SetTaxRate,
        InputType::SetBudgetAllocation,
        InputType::PauseSimulation,
        InputType::ResumeSimulation,
        InputType::SetSimulationSpeed,
    ] {
        handler.register_validator(kind.to_u8(), Box::new(|_registry, _player, _input| Ok(())));
    }

    handler.set_rollback(Box::new(|registry: &mut Registry, action| {
        if action.has_created_entity() {
            registry.destroy(action.created_entity);
        }
    }));

    handler
}

/// Convenience wrapper matching `RejectionReason::OutOfBounds`'s intent for validators that
/// want to reject on an explicit condition beyond the handler's own bounds check.
pub fn reject_unless(condition: bool, reason: RejectionReason) -> Result<(), RejectionReason> {
    if condition {
        Ok(())
    } else {
        Err(reason)
    }
}
