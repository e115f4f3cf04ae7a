//! Context menu assembly.
//!
//! Entries appear only when the server advertises the matching
//! capability and the host has not disabled them.

use std::collections::HashSet;

use crate::document::{DocumentPlugin, UiEvent};
use crate::references::ReferenceKind;

/// Identity of a context menu entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuItem {
	GoToDefinition,
	GoToTypeDefinition,
	GoToImplementation,
	FindAllReferences,
	Rename,
}

impl MenuItem {
	pub fn label(self) -> &'static str {
		match self {
			Self::GoToDefinition => "Go to definition",
			Self::GoToTypeDefinition => "Go to type definition",
			Self::GoToImplementation => "Go to implementation",
			Self::FindAllReferences => "Find all references",
			Self::Rename => "Rename symbol",
		}
	}

	const ALL: [Self; 5] = [
		Self::GoToDefinition,
		Self::GoToTypeDefinition,
		Self::GoToImplementation,
		Self::FindAllReferences,
		Self::Rename,
	];
}

/// One renderable menu entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
	pub item: MenuItem,
	pub label: &'static str,
}

/// Host-side menu configuration.
#[derive(Debug, Clone, Default)]
pub struct MenuConfig {
	/// Entries the host never wants shown.
	pub disabled: HashSet<MenuItem>,
	/// Mod+click acts as go-to-definition.
	pub mod_click_goto_definition: bool,
}

impl DocumentPlugin {
	/// Emits the context menu for a right-click at `pos`.
	pub fn open_context_menu(&self, pos: usize) {
		let entries: Vec<MenuEntry> = MenuItem::ALL
			.into_iter()
			.filter(|item| !self.shared.config.menu.disabled.contains(item))
			.filter(|item| match item {
				MenuItem::GoToDefinition => self.supports_reference_kind(ReferenceKind::Definition),
				MenuItem::GoToTypeDefinition => self.supports_reference_kind(ReferenceKind::TypeDefinition),
				MenuItem::GoToImplementation => self.supports_reference_kind(ReferenceKind::Implementation),
				MenuItem::FindAllReferences => self.supports_reference_kind(ReferenceKind::References),
				MenuItem::Rename => self.client().capabilities().is_some_and(|caps| caps.rename_provider.is_some()),
			})
			.map(|item| MenuEntry { item, label: item.label() })
			.collect();

		if entries.is_empty() {
			return;
		}
		self.shared.emit(UiEvent::ContextMenu { pos, entries });
	}

	/// Runs the feature behind a picked menu entry.
	pub async fn invoke_menu_entry(&self, item: MenuItem, pos: usize) {
		match item {
			MenuItem::GoToDefinition => self.goto(ReferenceKind::Definition, pos).await,
			MenuItem::GoToTypeDefinition => self.goto(ReferenceKind::TypeDefinition, pos).await,
			MenuItem::GoToImplementation => self.goto(ReferenceKind::Implementation, pos).await,
			MenuItem::FindAllReferences => self.goto(ReferenceKind::References, pos).await,
			MenuItem::Rename => {
				self.prepare_rename_or_notify(pos).await;
			}
		}
	}
}
