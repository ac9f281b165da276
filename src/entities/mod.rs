pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod user;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
pub use user::{Entity as User, Model as UserModel, UserRole};
