use crate::ir::ClassFile;

const NEST_HOST: &str = "NestHost";
const NEST_MEMBERS: &str = "NestMembers";

/// Remove the `NestHost` and `NestMembers` attributes from a class.
///
/// Returns how many attributes were removed; absence is a no-op.
pub(crate) fn strip_nest_attributes(class: &mut ClassFile) -> usize {
    let pool = &class.constant_pool;
    let before = class.attributes.len();
    class.attributes.retain(|attribute| {
        !attribute.is_named(pool, NEST_HOST) && !attribute.is_named(pool, NEST_MEMBERS)
    });
    before - class.attributes.len()
}
