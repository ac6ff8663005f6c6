use thiserror::Error;

use crate::format::rel::{ArithmeticOperator, ExtensionItem};
use crate::format::AddressSpace;
use crate::image::MemoryImage;

use super::SymbolTable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("not enough operands on the expression stack")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),
    #[error("expression leaves {0} values on the stack instead of one")]
    UnbalancedStack(usize),
    #[error("expression has no store operator")]
    MissingStoreOperator,
    #[error("store operator in the middle of an expression")]
    MisplacedStoreOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSize {
    Byte,
    Word,
}

/// Base addresses of the module an expression came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleBases {
    pub code: u16,
    pub data: u16,
    pub common: u16,
}

impl ModuleBases {
    #[must_use]
    pub fn relocate(&self, space: AddressSpace, value: u16) -> u16 {
        match space {
            AddressSpace::Absolute => value,
            AddressSpace::Code => value.wrapping_add(self.code),
            AddressSpace::Data => value.wrapping_add(self.data),
            AddressSpace::Common => value.wrapping_add(self.common),
        }
    }
}

/// An expression captured while loading a module, evaluated once every
/// module and library has been placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExpression {
    pub module: String,
    pub target: u16,
    pub items: Vec<ExtensionItem>,
    pub store: Option<StoreSize>,
    pub bases: ModuleBases,
}

impl PendingExpression {
    /// Splits the trailing store operator off a captured item run.
    #[must_use]
    pub fn capture(module: &str, target: u16, mut items: Vec<ExtensionItem>, bases: ModuleBases) -> Self {
        let store = match items.last() {
            Some(ExtensionItem::ArithmeticOperator(ArithmeticOperator::StoreAsByte)) => {
                Some(StoreSize::Byte)
            }
            Some(ExtensionItem::ArithmeticOperator(ArithmeticOperator::StoreAsWord)) => {
                Some(StoreSize::Word)
            }
            _ => None,
        };
        if store.is_some() {
            items.pop();
        }
        Self {
            module: module.to_string(),
            target,
            items,
            store,
            bases,
        }
    }

    /// Evaluates the expression and stores the result at its target.
    ///
    /// # Errors
    /// Any `ExprError` from evaluation; the image is left untouched then.
    pub fn apply(&self, image: &mut MemoryImage, symbols: &SymbolTable) -> Result<u16, ExprError> {
        let store = self.store.ok_or(ExprError::MissingStoreOperator)?;
        let value = evaluate(&self.items, &self.bases, symbols)?;
        match store {
            StoreSize::Byte => image.write_byte(self.target, value.to_le_bytes()[0]),
            StoreSize::Word => image.write_word(self.target, value),
        }
        Ok(value)
    }
}

/// Runs a postfix item list over a stack of 16-bit values.
///
/// # Errors
/// Stack underflow, leftover values, undefined symbols and division by zero.
pub fn evaluate(
    items: &[ExtensionItem],
    bases: &ModuleBases,
    symbols: &SymbolTable,
) -> Result<u16, ExprError> {
    let mut stack: Vec<u16> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            ExtensionItem::AddressReference { space, value } => {
                stack.push(bases.relocate(*space, *value));
            }
            ExtensionItem::ReferenceExternal(name) => {
                let value = symbols
                    .get(name)
                    .ok_or_else(|| ExprError::UndefinedSymbol(name.clone()))?;
                stack.push(value);
            }
            ExtensionItem::ArithmeticOperator(op) if op.is_store() => {
                return Err(ExprError::MisplacedStoreOperator);
            }
            ExtensionItem::ArithmeticOperator(op) if op.is_unary() => {
                let a = stack.pop().ok_or(ExprError::StackUnderflow)?;
                stack.push(apply_unary(*op, a));
            }
            ExtensionItem::ArithmeticOperator(op) => {
                let rhs = stack.pop().ok_or(ExprError::StackUnderflow)?;
                let lhs = stack.pop().ok_or(ExprError::StackUnderflow)?;
                stack.push(apply_binary(*op, lhs, rhs)?);
            }
        }
    }
    match stack.as_slice() {
        [value] => Ok(*value),
        other => Err(ExprError::UnbalancedStack(other.len())),
    }
}

fn apply_unary(op: ArithmeticOperator, a: u16) -> u16 {
    match op {
        ArithmeticOperator::High => a >> 8,
        ArithmeticOperator::Low => a & 0x00ff,
        ArithmeticOperator::Not => !a,
        ArithmeticOperator::UnaryMinus => a.wrapping_neg(),
        _ => a,
    }
}

fn apply_binary(op: ArithmeticOperator, lhs: u16, rhs: u16) -> Result<u16, ExprError> {
    let truth = |b: bool| if b { 0xffff } else { 0x0000 };
    Ok(match op {
        ArithmeticOperator::Plus => lhs.wrapping_add(rhs),
        ArithmeticOperator::Minus => lhs.wrapping_sub(rhs),
        ArithmeticOperator::Multiply => lhs.wrapping_mul(rhs),
        ArithmeticOperator::Divide => lhs.checked_div(rhs).ok_or(ExprError::DivisionByZero)?,
        ArithmeticOperator::Mod => lhs.checked_rem(rhs).ok_or(ExprError::DivisionByZero)?,
        ArithmeticOperator::ShiftLeft => lhs.checked_shl(u32::from(rhs)).unwrap_or(0),
        ArithmeticOperator::ShiftRight => lhs.checked_shr(u32::from(rhs)).unwrap_or(0),
        ArithmeticOperator::Equals => truth(lhs == rhs),
        ArithmeticOperator::NotEquals => truth(lhs != rhs),
        ArithmeticOperator::LessThan => truth(lhs < rhs),
        ArithmeticOperator::LessOrEqual => truth(lhs <= rhs),
        ArithmeticOperator::GreaterThan => truth(lhs > rhs),
        ArithmeticOperator::GreaterOrEqual => truth(lhs >= rhs),
        ArithmeticOperator::And => lhs & rhs,
        ArithmeticOperator::Or => lhs | rhs,
        ArithmeticOperator::Xor => lhs ^ rhs,
        ArithmeticOperator::High
        | ArithmeticOperator::Low
        | ArithmeticOperator::Not
        | ArithmeticOperator::UnaryMinus
        | ArithmeticOperator::StoreAsByte
        | ArithmeticOperator::StoreAsWord => lhs,
    })
}
